//! File persistence for the dedup cache.
//!
//! The snapshot is written to `<path>.tmp` and renamed over `<path>`, so a
//! crash mid-write leaves the previous snapshot intact.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::{DedupCache, DedupConfig, DedupError};

/// Loads and persists a [`DedupCache`] at a fixed file path.
#[derive(Clone, Debug)]
pub struct DedupStore {
    path: PathBuf,
}

impl DedupStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Reads the snapshot, returning `Ok(None)` if no file exists.
    pub fn load(&self) -> Result<Option<DedupCache>, DedupError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DedupError::Io(e)),
        };
        DedupCache::from_bytes(&bytes).map(Some)
    }

    /// Restores the persisted cache, or starts an empty one.
    ///
    /// Starting empty after an unclean shutdown means keys relayed since
    /// the last snapshot may be submitted again. That case is logged.
    pub fn load_or_fresh(&self, cfg: &DedupConfig) -> DedupCache {
        match self.load() {
            Ok(Some(cache)) => {
                if cache.is_strict() != cfg.strict {
                    warn!(
                        path = %self.path.display(),
                        snapshot_strict = cache.is_strict(),
                        configured_strict = cfg.strict,
                        "dedup snapshot strictness differs from configuration; keeping snapshot"
                    );
                }
                info!(
                    path = %self.path.display(),
                    inserted = cache.inserted(),
                    "restored dedup cache"
                );
                cache
            }
            Ok(None) => {
                warn!(
                    path = %self.path.display(),
                    "no dedup snapshot found; starting empty, keys relayed before an unclean shutdown may be resubmitted"
                );
                DedupCache::new(cfg)
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "unreadable dedup snapshot; starting empty, keys relayed before it may be resubmitted"
                );
                DedupCache::new(cfg)
            }
        }
    }

    /// Atomically replaces the snapshot on disk.
    pub fn persist(&self, cache: &DedupCache) -> Result<(), DedupError> {
        let bytes = cache.save()?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.tmp_path();
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.path)?;

        info!(
            path = %self.path.display(),
            bytes = bytes.len(),
            "persisted dedup cache"
        );
        Ok(())
    }
}
