//! RocksDB-backed upstream log.
//!
//! Column families:
//!
//! - `"entries"`: big-endian `u64` offset -> JSON-encoded [`RawRecord`],
//! - `"keys"`:    submission key -> big-endian `u64` offset,
//! - `"meta"`:    `"next_offset"` and the committed `"cursor"`, both
//!   big-endian `u64`.
//!
//! Appends are serialized through a writer lock and land as one atomic
//! write batch, so an entry, its key and the advanced head are never
//! observed separately.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use tokio::sync::Notify;
use tracing::debug;

use super::{AppendOutcome, LogError, UpstreamLog, long_poll};
use crate::types::{Cursor, LogEntry, RawRecord};

type Db = DBWithThreadMode<MultiThreaded>;

const CF_ENTRIES: &str = "entries";
const CF_KEYS: &str = "keys";
const CF_META: &str = "meta";

const META_NEXT_OFFSET: &[u8] = b"next_offset";
const META_CURSOR: &[u8] = b"cursor";

/// Configuration for [`RocksDbLog`].
#[derive(Clone, Debug)]
pub struct RocksDbLogConfig {
    /// Filesystem path to the RocksDB database directory.
    pub path: String,
    /// Whether to create the database and missing column families if they
    /// do not yet exist.
    pub create_if_missing: bool,
}

impl Default for RocksDbLogConfig {
    fn default() -> Self {
        Self {
            path: "data/relay-log".to_string(),
            create_if_missing: true,
        }
    }
}

/// RocksDB-backed implementation of [`UpstreamLog`].
pub struct RocksDbLog {
    db: Arc<Db>,
    write_lock: Mutex<()>,
    notify: Notify,
}

impl RocksDbLog {
    /// Opens (or creates) the log at the configured path.
    pub fn open(cfg: &RocksDbLogConfig) -> Result<Self, LogError> {
        let path = Path::new(&cfg.path);

        let mut opts = Options::default();
        opts.create_if_missing(cfg.create_if_missing);
        opts.create_missing_column_families(cfg.create_if_missing);

        let cfs = vec![
            ColumnFamilyDescriptor::new("default", Options::default()),
            ColumnFamilyDescriptor::new(CF_ENTRIES, Options::default()),
            ColumnFamilyDescriptor::new(CF_KEYS, Options::default()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = Db::open_cf_descriptors(&opts, path, cfs)?;
        debug!(path = %cfg.path, "opened upstream log");

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
            notify: Notify::new(),
        })
    }

    fn cf(&self, name: &'static str) -> Result<Arc<BoundColumnFamily<'_>>, LogError> {
        self.db
            .cf_handle(name)
            .ok_or(LogError::MissingColumnFamily(name))
    }

    fn read_meta_u64(&self, key: &[u8], what: &'static str) -> Result<Option<u64>, LogError> {
        let cf_meta = self.cf(CF_META)?;
        match self.db.get_cf(&cf_meta, key)? {
            None => Ok(None),
            Some(bytes) => decode_u64(&bytes)
                .map(Some)
                .ok_or(LogError::CorruptedMeta(what)),
        }
    }

    fn scan(&self, from: Cursor, max: usize) -> Result<Vec<LogEntry>, LogError> {
        let cf = self.cf(CF_ENTRIES)?;
        let start = from.offset().to_be_bytes();

        let mut out = Vec::new();
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, Direction::Forward))
            .take(max)
        {
            let (key, value) = item?;
            let offset = decode_u64(&key).ok_or(LogError::CorruptedMeta("entry offset"))?;
            let record: RawRecord =
                serde_json::from_slice(&value).map_err(|e| LogError::CorruptedEntry {
                    offset,
                    detail: e.to_string(),
                })?;
            out.push(LogEntry { offset, record });
        }
        Ok(out)
    }
}

fn decode_u64(bytes: &[u8]) -> Option<u64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(arr))
}

#[async_trait]
impl UpstreamLog for RocksDbLog {
    fn append(&self, record: &RawRecord) -> Result<AppendOutcome, LogError> {
        let value = serde_json::to_vec(record).map_err(|e| LogError::Encode(e.to_string()))?;

        let offset = {
            let _guard = self.write_lock.lock().map_err(|_| LogError::Poisoned)?;

            let cf_keys = self.cf(CF_KEYS)?;
            if self.db.get_cf(&cf_keys, record.key.as_bytes())?.is_some() {
                return Ok(AppendOutcome::Duplicate);
            }

            let offset = self
                .read_meta_u64(META_NEXT_OFFSET, "next_offset")?
                .unwrap_or(0);

            let cf_entries = self.cf(CF_ENTRIES)?;
            let cf_meta = self.cf(CF_META)?;

            let mut batch = WriteBatch::default();
            batch.put_cf(&cf_entries, offset.to_be_bytes(), &value);
            batch.put_cf(&cf_keys, record.key.as_bytes(), offset.to_be_bytes());
            batch.put_cf(&cf_meta, META_NEXT_OFFSET, (offset + 1).to_be_bytes());
            self.db.write(batch)?;

            offset
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
        long_poll(&self.notify, wait, || self.scan(from, max)).await
    }

    fn committed_cursor(&self) -> Result<Option<Cursor>, LogError> {
        Ok(self.read_meta_u64(META_CURSOR, "cursor")?.map(Cursor))
    }

    fn commit_cursor(&self, cursor: Cursor) -> Result<(), LogError> {
        let cf_meta = self.cf(CF_META)?;
        self.db
            .put_cf(&cf_meta, META_CURSOR, cursor.offset().to_be_bytes())?;
        Ok(())
    }

    fn head(&self) -> Result<Cursor, LogError> {
        Ok(Cursor(
            self.read_meta_u64(META_NEXT_OFFSET, "next_offset")?
                .unwrap_or(0),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordKind;
    use tempfile::TempDir;

    fn cfg(tmp: &TempDir) -> RocksDbLogConfig {
        RocksDbLogConfig {
            path: tmp.path().to_string_lossy().to_string(),
            create_if_missing: true,
        }
    }

    fn record(key: &str, kind: RecordKind, block_id: u64) -> RawRecord {
        RawRecord {
            key: key.to_string(),
            kind,
            hash_to_verify: "$argon2id$v=19$m=8,t=1,p=1$c2FsdA$ZGln".to_string(),
            account: "0x0000000000000000000000000000000000000001".to_string(),
            block_id,
        }
    }

    #[tokio::test]
    async fn append_read_and_reject_duplicate_keys() {
        let tmp = TempDir::new().expect("create temp dir");
        let log = RocksDbLog::open(&cfg(&tmp)).expect("open RocksDB");

        for i in 0..3 {
            let out = log
                .append(&record(&format!("k{i}"), RecordKind::Xuni, i))
                .expect("append");
            assert_eq!(out, AppendOutcome::Appended { offset: i });
        }
        assert_eq!(
            log.append(&record("k1", RecordKind::Hash, 99))
                .expect("append"),
            AppendOutcome::Duplicate
        );

        let entries = log
            .read_from(Cursor(1), 10, Duration::ZERO)
            .await
            .expect("read");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].offset, 1);
        assert_eq!(entries[0].record, record("k1", RecordKind::Xuni, 1));
        assert_eq!(log.head().expect("head"), Cursor(3));
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let tmp = TempDir::new().expect("create temp dir");

        {
            let log = RocksDbLog::open(&cfg(&tmp)).expect("open RocksDB");
            log.append(&record("a", RecordKind::Hash, 1)).expect("append");
            log.append(&record("b", RecordKind::Hash, 2)).expect("append");
            log.commit_cursor(Cursor(1)).expect("commit");
        }

        let log = RocksDbLog::open(&cfg(&tmp)).expect("reopen RocksDB");
        assert_eq!(log.committed_cursor().expect("cursor"), Some(Cursor(1)));
        assert_eq!(log.head().expect("head"), Cursor(2));
        assert_eq!(
            log.append(&record("a", RecordKind::Hash, 3)).expect("append"),
            AppendOutcome::Duplicate
        );
        assert_eq!(
            log.append(&record("c", RecordKind::Hash, 3)).expect("append"),
            AppendOutcome::Appended { offset: 2 }
        );
    }

    #[tokio::test]
    async fn empty_log_has_no_cursor_and_reads_nothing() {
        let tmp = TempDir::new().expect("create temp dir");
        let log = RocksDbLog::open(&cfg(&tmp)).expect("open RocksDB");

        assert_eq!(log.committed_cursor().expect("cursor"), None);
        assert_eq!(log.head().expect("head"), Cursor(0));
        let entries = log
            .read_from(Cursor(0), 10, Duration::from_millis(10))
            .await
            .expect("read");
        assert!(entries.is_empty());
    }
}
