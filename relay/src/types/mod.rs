//! Core domain types used by the relay.
//!
//! This module defines the producer-facing record shape, the validated
//! forms produced by the codec, and the log positions the coordinator
//! commits against. The goal is to avoid passing naked strings and byte
//! buffers between pipeline stages and instead use domain newtypes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Checksummed 20-byte account identifiers.
pub mod account;
/// Ordered groups of accepted records.
pub mod batch;
/// Raw and encoded hash records.
pub mod record;

pub use account::{ACCOUNT_LEN, NormalizedAccount};
pub use batch::Batch;
pub use record::{AcceptedRecord, EncodedRecord, KEY_LEN, RawRecord, RecordKind};

/// Length in bytes of a transaction hash.
pub const TX_HASH_LEN: usize = 32;

/// Resumable read position in the upstream log.
///
/// A cursor always points at the *next* offset to read, so a freshly
/// created log starts at `Cursor(0)` and a cursor taken after consuming
/// the entry at offset `n` is `Cursor(n + 1)`.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct Cursor(pub u64);

impl Cursor {
    /// Cursor positioned just past the entry at `offset`.
    pub fn after(offset: u64) -> Self {
        Cursor(offset.saturating_add(1))
    }

    /// Returns the next offset this cursor would read.
    pub fn offset(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One record read back from the upstream log together with its position.
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub offset: u64,
    pub record: RawRecord,
}

impl LogEntry {
    /// Cursor that resumes reading just after this entry.
    pub fn next_cursor(&self) -> Cursor {
        Cursor::after(self.offset)
    }
}

/// Hash of a transaction submitted to the ledger.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct TxHash(pub [u8; TX_HASH_LEN]);

impl TxHash {
    pub fn as_bytes(&self) -> &[u8; TX_HASH_LEN] {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_after_points_past_offset() {
        assert_eq!(Cursor::after(0), Cursor(1));
        assert_eq!(Cursor::after(41).offset(), 42);
        assert_eq!(Cursor::after(u64::MAX), Cursor(u64::MAX));
    }

    #[test]
    fn cursors_order_by_offset() {
        assert!(Cursor(3) < Cursor(4));
        assert_eq!(Cursor(7).max(Cursor(5)), Cursor(7));
    }

    #[test]
    fn tx_hash_displays_as_prefixed_hex() {
        let h = TxHash([0xAB; TX_HASH_LEN]);
        let s = h.to_string();
        assert!(s.starts_with("0x"));
        assert_eq!(s.len(), 2 + TX_HASH_LEN * 2);
    }
}
