//! Ordered groups of accepted records.

use super::{AcceptedRecord, Cursor, EncodedRecord, NormalizedAccount, RecordKind};

/// A bounded, ordered group of records submitted in one transaction.
///
/// All records in a batch share one [`RecordKind`], which selects the
/// ledger method used to submit it. The `cursor` is the log position that
/// may be committed once the batch is confirmed on-chain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Batch {
    pub kind: RecordKind,
    pub records: Vec<AcceptedRecord>,
    pub cursor: Cursor,
}

impl Batch {
    /// A batch with no records that only carries a cursor.
    ///
    /// Emitted when everything read since the last commit was dropped;
    /// the submission engine reports it as skipped.
    pub fn empty(kind: RecordKind, cursor: Cursor) -> Self {
        Self {
            kind,
            records: Vec::new(),
            cursor,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Submission keys, in batch order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.key.as_str())
    }

    /// Account column of the batch, in batch order.
    pub fn accounts(&self) -> Vec<NormalizedAccount> {
        self.records.iter().map(|r| r.account).collect()
    }

    /// Upstream sequence numbers, in batch order.
    pub fn block_ids(&self) -> Vec<u64> {
        self.records.iter().map(|r| r.block_id).collect()
    }

    /// Encoded record column of the batch, in batch order.
    pub fn encoded(&self) -> Vec<EncodedRecord> {
        self.records.iter().map(|r| r.encoded.clone()).collect()
    }
}
