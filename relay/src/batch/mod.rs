//! Batch buffer.
//!
//! Accumulates accepted records into fixed-size, single-kind batches and
//! tracks how far the upstream log has been consumed. No I/O happens here.
//!
//! Records of different kinds go into separate lanes because each kind is
//! submitted through a different ledger method. A batch's cursor is the
//! read high-water mark, lowered to the earliest offset still waiting in
//! any lane. Committing that cursor never skips a record that has not
//! been submitted yet.

use std::collections::VecDeque;

use crate::types::{AcceptedRecord, Batch, Cursor, RecordKind};

#[derive(Debug)]
struct Pending {
    offset: u64,
    record: AcceptedRecord,
}

/// Ordered per-kind accumulation of accepted records.
#[derive(Debug)]
pub struct BatchBuffer {
    batch_size: usize,
    lanes: [VecDeque<Pending>; 2],
    /// Cursor just past the last log entry consumed (pushed or skipped).
    read_mark: Cursor,
    /// Highest cursor handed out with a batch so far.
    emitted: Cursor,
}

impl BatchBuffer {
    /// Creates an empty buffer. `start` is the cursor reading resumes from.
    pub fn new(batch_size: usize, start: Cursor) -> Self {
        Self {
            batch_size: batch_size.max(1),
            lanes: [VecDeque::new(), VecDeque::new()],
            read_mark: start,
            emitted: start,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Cursor just past the last consumed entry.
    pub fn read_mark(&self) -> Cursor {
        self.read_mark
    }

    /// Number of records waiting across all lanes.
    pub fn pending(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    pub fn pending_in(&self, kind: RecordKind) -> usize {
        self.lanes[kind.lane()].len()
    }

    /// `true` when a flush would emit something.
    pub fn has_unflushed(&self) -> bool {
        self.pending() > 0 || self.read_mark > self.emitted
    }

    /// Adds an accepted record read at `offset`.
    ///
    /// Returns a full batch once the record's lane reaches the batch size.
    pub fn push(&mut self, offset: u64, record: AcceptedRecord) -> Option<Batch> {
        self.advance(offset);

        let kind = record.kind;
        let lane = &mut self.lanes[kind.lane()];
        lane.push_back(Pending { offset, record });

        if lane.len() >= self.batch_size {
            Some(self.take(kind, self.batch_size))
        } else {
            None
        }
    }

    /// Marks the entry at `offset` as consumed without buffering it.
    ///
    /// Used for duplicates and rejected records.
    pub fn skip(&mut self, offset: u64) {
        self.advance(offset);
    }

    /// Forces out a non-full batch.
    ///
    /// Emits the lane holding the oldest record. With every lane empty but
    /// entries consumed since the last emitted cursor, emits an empty batch
    /// carrying the read mark so the cursor can still be committed.
    pub fn flush_partial(&mut self) -> Option<Batch> {
        let oldest = RecordKind::ALL
            .into_iter()
            .filter_map(|kind| self.lanes[kind.lane()].front().map(|p| (p.offset, kind)))
            .min_by_key(|(offset, _)| *offset);

        if let Some((_, kind)) = oldest {
            let n = self.lanes[kind.lane()].len().min(self.batch_size);
            return Some(self.take(kind, n));
        }

        if self.read_mark > self.emitted {
            self.emitted = self.read_mark;
            return Some(Batch::empty(RecordKind::Hash, self.read_mark));
        }

        None
    }

    fn advance(&mut self, offset: u64) {
        self.read_mark = self.read_mark.max(Cursor::after(offset));
    }

    fn take(&mut self, kind: RecordKind, n: usize) -> Batch {
        let records: Vec<AcceptedRecord> = self.lanes[kind.lane()]
            .drain(..n)
            .map(|p| p.record)
            .collect();

        let cursor = self
            .lanes
            .iter()
            .filter_map(|lane| lane.front().map(|p| Cursor(p.offset)))
            .min()
            .map_or(self.read_mark, |earliest| earliest.min(self.read_mark));

        self.emitted = self.emitted.max(cursor);

        Batch {
            kind,
            records,
            cursor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EncodedRecord, KEY_LEN, NormalizedAccount};

    fn record(kind: RecordKind, id: u64) -> AcceptedRecord {
        AcceptedRecord {
            key: format!("key-{id}"),
            kind,
            account: NormalizedAccount([id as u8; 20]),
            block_id: id,
            encoded: EncodedRecord {
                parallelism: 1,
                memory_cost: 8,
                time_cost: 1,
                version: 19,
                key: [id as u8; KEY_LEN],
                salt: vec![1, 2, 3],
            },
        }
    }

    #[test]
    fn exactly_n_records_yield_one_batch_in_order() {
        let mut buf = BatchBuffer::new(3, Cursor(0));

        assert!(buf.push(0, record(RecordKind::Hash, 0)).is_none());
        assert!(buf.push(1, record(RecordKind::Hash, 1)).is_none());
        let batch = buf.push(2, record(RecordKind::Hash, 2)).expect("full batch");

        assert_eq!(batch.kind, RecordKind::Hash);
        assert_eq!(batch.block_ids(), vec![0, 1, 2]);
        assert_eq!(batch.cursor, Cursor(3));
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn n_plus_one_records_leave_one_pending() {
        let mut buf = BatchBuffer::new(3, Cursor(0));
        let mut batches = Vec::new();
        for i in 0..4 {
            batches.extend(buf.push(i, record(RecordKind::Hash, i)));
        }

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(buf.pending(), 1);

        let rest = buf.flush_partial().expect("partial batch");
        assert_eq!(rest.block_ids(), vec![3]);
        assert_eq!(rest.cursor, Cursor(4));
    }

    #[test]
    fn skipped_offsets_advance_read_mark() {
        let mut buf = BatchBuffer::new(2, Cursor(10));
        buf.skip(10);
        buf.push(11, record(RecordKind::Hash, 11));
        buf.skip(12);
        let batch = buf.push(13, record(RecordKind::Hash, 13)).expect("full batch");

        assert_eq!(batch.cursor, Cursor(14));
    }

    #[test]
    fn cursor_does_not_pass_records_waiting_in_other_lane() {
        let mut buf = BatchBuffer::new(2, Cursor(0));
        buf.push(0, record(RecordKind::Xuni, 0));
        buf.push(1, record(RecordKind::Hash, 1));
        let batch = buf.push(2, record(RecordKind::Hash, 2)).expect("hash batch");

        assert_eq!(batch.kind, RecordKind::Hash);
        assert_eq!(batch.cursor, Cursor(0));

        let xuni = buf.flush_partial().expect("xuni flush");
        assert_eq!(xuni.kind, RecordKind::Xuni);
        assert_eq!(xuni.cursor, Cursor(3));
    }

    #[test]
    fn flush_prefers_oldest_lane() {
        let mut buf = BatchBuffer::new(5, Cursor(0));
        buf.push(0, record(RecordKind::Hash, 0));
        buf.push(1, record(RecordKind::Xuni, 1));

        let first = buf.flush_partial().expect("flush");
        assert_eq!(first.kind, RecordKind::Hash);
        assert_eq!(first.cursor, Cursor(1));

        let second = buf.flush_partial().expect("flush");
        assert_eq!(second.kind, RecordKind::Xuni);
        assert_eq!(second.cursor, Cursor(2));

        assert!(buf.flush_partial().is_none());
    }

    #[test]
    fn flush_after_only_skips_emits_empty_batch_once() {
        let mut buf = BatchBuffer::new(5, Cursor(4));
        assert!(!buf.has_unflushed());
        assert!(buf.flush_partial().is_none());

        buf.skip(4);
        buf.skip(5);
        assert!(buf.has_unflushed());

        let batch = buf.flush_partial().expect("empty batch");
        assert!(batch.is_empty());
        assert_eq!(batch.cursor, Cursor(6));

        assert!(buf.flush_partial().is_none());
    }
}
