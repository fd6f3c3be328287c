use crate::types::account::checksum_hex;
use crate::types::{ACCOUNT_LEN, NormalizedAccount};

use super::ValidationError;

/// Validates an account string and returns its normalized form.
///
/// Accepts 40 hex characters with an optional `0x` prefix. All-lowercase
/// and all-uppercase input is accepted as is; mixed-case input must carry
/// a correct EIP-55 checksum.
pub fn normalize_account(input: &str) -> Result<NormalizedAccount, ValidationError> {
    let trimmed = input.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if body.len() != ACCOUNT_LEN * 2 {
        return Err(ValidationError::InvalidAccount(format!(
            "expected {} hex chars, found {}",
            ACCOUNT_LEN * 2,
            body.len()
        )));
    }

    let mut bytes = [0u8; ACCOUNT_LEN];
    hex::decode_to_slice(body, &mut bytes)
        .map_err(|e| ValidationError::InvalidAccount(e.to_string()))?;

    let has_lower = body.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = body.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper && checksum_hex(&bytes) != body {
        return Err(ValidationError::InvalidAccount(format!(
            "bad checksum for {trimmed}"
        )));
    }

    Ok(NormalizedAccount(bytes))
}
