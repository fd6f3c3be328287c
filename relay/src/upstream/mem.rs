//! In-memory upstream log.
//!
//! Useful for unit tests and local dry runs. Entries live in a `Vec`
//! indexed by offset; nothing survives the process.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{AppendOutcome, LogError, UpstreamLog, long_poll};
use crate::types::{Cursor, LogEntry, RawRecord};

#[derive(Default)]
struct State {
    entries: Vec<RawRecord>,
    keys: HashSet<String>,
    committed: Option<Cursor>,
}

/// In-memory implementation of [`UpstreamLog`].
#[derive(Default)]
pub struct MemoryLog {
    state: Mutex<State>,
    notify: Notify,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a log with `records` at offsets `0..n`.
    ///
    /// Unlike [`UpstreamLog::append`], repeated keys are kept, which lets
    /// tests reproduce logs written by producers that did not dedupe.
    pub fn from_records(records: impl IntoIterator<Item = RawRecord>) -> Self {
        let mut state = State::default();
        for record in records {
            state.keys.insert(record.key.clone());
            state.entries.push(record);
        }
        Self {
            state: Mutex::new(state),
            notify: Notify::new(),
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.state().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, LogError> {
        self.state.lock().map_err(|_| LogError::Poisoned)
    }
}

#[async_trait]
impl UpstreamLog for MemoryLog {
    fn append(&self, record: &RawRecord) -> Result<AppendOutcome, LogError> {
        let offset = {
            let mut state = self.state()?;
            if !state.keys.insert(record.key.clone()) {
                return Ok(AppendOutcome::Duplicate);
            }
            state.entries.push(record.clone());
            (state.entries.len() - 1) as u64
        };

        self.notify.notify_waiters();
        Ok(AppendOutcome::Appended { offset })
    }

    async fn read_from(
        &self,
        from: Cursor,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<LogEntry>, LogError> {
        long_poll(&self.notify, wait, || {
            let state = self.state()?;
            let start = usize::try_from(from.offset()).unwrap_or(usize::MAX);
            Ok(state
                .entries
                .iter()
                .enumerate()
                .skip(start)
                .take(max)
                .map(|(i, record)| LogEntry {
                    offset: i as u64,
                    record: record.clone(),
                })
                .collect())
        })
        .await
    }

    fn committed_cursor(&self) -> Result<Option<Cursor>, LogError> {
        Ok(self.state()?.committed)
    }

    fn commit_cursor(&self, cursor: Cursor) -> Result<(), LogError> {
        self.state()?.committed = Some(cursor);
        Ok(())
    }

    fn head(&self) -> Result<Cursor, LogError> {
        Ok(Cursor(self.state()?.entries.len() as u64))
    }
}
