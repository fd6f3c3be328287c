//! Record codec.
//!
//! Turns a producer's [`RawRecord`] into an [`AcceptedRecord`] carrying the
//! packed [`EncodedRecord`] the ledger contract expects. The codec is a pure
//! function of its input: identical records always encode to identical
//! bytes, and every failure is a permanent [`ValidationError`].

mod account;
mod descriptor;
mod error;

pub use account::normalize_account;
pub use descriptor::{ALGORITHM_TAG, CostParams, ParsedDescriptor, SUPPORTED_VERSION};
pub use error::ValidationError;

use crate::types::{AcceptedRecord, EncodedRecord, KEY_LEN, RawRecord};

/// Upper bound on key material before it is rejected instead of truncated.
pub const MAX_KEY_MATERIAL_LEN: usize = 64;

/// Where the 32-byte key field is taken from.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum KeySource {
    /// Hex-decoded `RawRecord::key` (optionally `0x`-prefixed).
    RecordKey,
    /// Base64-decoded digest field of the descriptor. `RawRecord::key` stays
    /// an opaque id.
    #[default]
    Digest,
}

/// Parses a record using the default [`KeySource`].
pub fn parse(raw: &RawRecord) -> Result<AcceptedRecord, ValidationError> {
    parse_with(raw, KeySource::default())
}

/// Parses a record, taking key material from `source`.
pub fn parse_with(raw: &RawRecord, source: KeySource) -> Result<AcceptedRecord, ValidationError> {
    let descriptor = ParsedDescriptor::parse(&raw.hash_to_verify)?;

    let material = match source {
        KeySource::RecordKey => {
            let body = raw.key.strip_prefix("0x").unwrap_or(&raw.key);
            hex::decode(body).map_err(|e| ValidationError::InvalidEncoding {
                field: "key",
                detail: e.to_string(),
            })?
        }
        KeySource::Digest => descriptor.digest.clone(),
    };
    let key = fit_key(&material)?;

    let account = normalize_account(&raw.account)?;

    Ok(AcceptedRecord {
        key: raw.key.clone(),
        kind: raw.kind,
        account,
        block_id: raw.block_id,
        encoded: EncodedRecord {
            parallelism: descriptor.cost.parallelism,
            memory_cost: descriptor.cost.memory,
            time_cost: descriptor.cost.time,
            version: descriptor.version,
            key,
            salt: descriptor.salt,
        },
    })
}

/// Truncates key material to [`KEY_LEN`] bytes within the sanity bound.
fn fit_key(material: &[u8]) -> Result<[u8; KEY_LEN], ValidationError> {
    let len = material.len();
    if len > MAX_KEY_MATERIAL_LEN {
        return Err(ValidationError::OversizedKey { len });
    }
    if len < KEY_LEN {
        return Err(ValidationError::KeyTooShort { len });
    }

    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&material[..KEY_LEN]);
    Ok(key)
}
