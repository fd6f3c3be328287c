//! Durable upstream log consumed by the pipeline.
//!
//! The intake appends producer records keyed by submission key; the
//! coordinator reads them back in offset order and commits a cursor once
//! a batch lands on-chain. Two backends are provided:
//!
//! - [`mem::MemoryLog`], an in-memory log for tests and dry runs,
//! - [`rocksdb::RocksDbLog`], a persistent log with dedicated column
//!   families for entries, keys and metadata.

pub mod mem;
pub mod rocksdb;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::types::{Cursor, LogEntry, RawRecord};

pub use self::mem::MemoryLog;
pub use self::rocksdb::{RocksDbLog, RocksDbLogConfig};

/// Result of appending a record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AppendOutcome {
    /// Stored at `offset`.
    Appended { offset: u64 },
    /// A record with the same key was appended before; nothing was stored.
    Duplicate,
}

/// Ordered, persistent, keyed log with a committed-cursor slot.
#[async_trait]
pub trait UpstreamLog: Send + Sync {
    /// Appends `record` unless its key is already present.
    fn append(&self, record: &RawRecord) -> Result<AppendOutcome, LogError>;

    /// Returns up to `max` entries starting at `from`, in offset order.
    ///
    /// When nothing is available, waits up to `wait` for an append before
    /// returning an empty vector.
    async fn read_from(
        &self,
        from: Cursor,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<LogEntry>, LogError>;

    /// Last committed cursor, if any was ever committed.
    fn committed_cursor(&self) -> Result<Option<Cursor>, LogError>;

    /// Persists `cursor` as the committed read position.
    fn commit_cursor(&self, cursor: Cursor) -> Result<(), LogError>;

    /// Cursor just past the newest entry.
    fn head(&self) -> Result<Cursor, LogError>;
}

/// Errors from an upstream log backend.
#[derive(Debug)]
pub enum LogError {
    /// Underlying RocksDB error.
    RocksDb(::rocksdb::Error),
    /// Required column family was not found.
    MissingColumnFamily(&'static str),
    /// A stored entry could not be decoded.
    CorruptedEntry { offset: u64, detail: String },
    /// Malformed metadata value.
    CorruptedMeta(&'static str),
    /// A record could not be encoded for storage.
    Encode(String),
    /// A lock was poisoned by a panicking writer.
    Poisoned,
}

impl From<::rocksdb::Error> for LogError {
    fn from(e: ::rocksdb::Error) -> Self {
        LogError::RocksDb(e)
    }
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogError::RocksDb(e) => write!(f, "rocksdb error: {e}"),
            LogError::MissingColumnFamily(name) => write!(f, "missing column family {name:?}"),
            LogError::CorruptedEntry { offset, detail } => {
                write!(f, "corrupted log entry at offset {offset}: {detail}")
            }
            LogError::CorruptedMeta(what) => write!(f, "corrupted log metadata: {what}"),
            LogError::Encode(msg) => write!(f, "failed to encode log entry: {msg}"),
            LogError::Poisoned => write!(f, "log lock poisoned"),
        }
    }
}

impl std::error::Error for LogError {}

/// Runs `scan` until it yields entries or `wait` elapses.
///
/// The notification is armed before each scan so an append racing with
/// the scan still wakes the reader.
pub(crate) async fn long_poll<F>(
    notify: &Notify,
    wait: Duration,
    mut scan: F,
) -> Result<Vec<LogEntry>, LogError>
where
    F: FnMut() -> Result<Vec<LogEntry>, LogError> + Send,
{
    let deadline = Instant::now() + wait;

    loop {
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let entries = scan()?;
        if !entries.is_empty() || Instant::now() >= deadline {
            return Ok(entries);
        }

        if tokio::time::timeout_at(deadline, notified).await.is_err() {
            return Ok(Vec::new());
        }
    }
}
