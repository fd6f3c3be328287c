//! Checksummed account identifiers.

use std::fmt;

use tiny_keccak::{Hasher, Keccak};

/// Length in bytes of an account address.
pub const ACCOUNT_LEN: usize = 20;

/// A validated 20-byte account address.
///
/// Construction goes through [`crate::codec::normalize_account`], which
/// enforces the hex format and, for mixed-case input, the EIP-55 checksum.
/// [`fmt::Display`] always renders the checksummed form.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct NormalizedAccount(pub [u8; ACCOUNT_LEN]);

impl NormalizedAccount {
    pub fn as_bytes(&self) -> &[u8; ACCOUNT_LEN] {
        &self.0
    }

    /// Returns the `0x`-prefixed EIP-55 checksummed address.
    pub fn to_checksum_string(&self) -> String {
        format!("0x{}", checksum_hex(&self.0))
    }
}

impl fmt::Display for NormalizedAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum_string())
    }
}

impl fmt::Debug for NormalizedAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NormalizedAccount({})", self.to_checksum_string())
    }
}

/// EIP-55 mixed-case hex for `bytes`, without prefix.
///
/// Each hex letter is upper-cased when the matching nibble of
/// `keccak256(lowercase_hex)` is 8 or more.
pub(crate) fn checksum_hex(bytes: &[u8; ACCOUNT_LEN]) -> String {
    let lower = hex::encode(bytes);

    let mut keccak = Keccak::v256();
    let mut digest = [0u8; 32];
    keccak.update(lower.as_bytes());
    keccak.finalize(&mut digest);

    lower
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let byte = digest[i / 2];
            let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
            if c.is_ascii_alphabetic() && nibble >= 8 {
                c.to_ascii_uppercase()
            } else {
                c
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_hex(s: &str) -> NormalizedAccount {
        let raw = hex::decode(s.trim_start_matches("0x")).expect("valid hex");
        let mut arr = [0u8; ACCOUNT_LEN];
        arr.copy_from_slice(&raw);
        NormalizedAccount(arr)
    }

    #[test]
    fn checksum_matches_eip55_vectors() {
        let vectors = [
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
            "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
            "0xD1220A0cf47c7B9Be7A2E6BA89F429762e7b9aDb",
        ];

        for expected in vectors {
            let acct = from_hex(&expected.to_ascii_lowercase());
            assert_eq!(acct.to_checksum_string(), expected);
        }
    }

    #[test]
    fn display_uses_checksum_form() {
        let acct = from_hex("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed");
        assert_eq!(
            format!("{acct}"),
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );
    }
}
