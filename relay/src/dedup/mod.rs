//! Duplicate suppression.
//!
//! - [`BloomFilter`]: analytically sized probabilistic set,
//! - [`DedupCache`]: the membership cache consulted by the pipeline,
//! - [`DedupStore`]: snapshot persistence across restarts.

pub mod bloom;
pub mod cache;
pub mod store;

use std::fmt;

pub use bloom::BloomFilter;
pub use cache::{DedupCache, SNAPSHOT_VERSION};
pub use store::DedupStore;

/// Configuration for the dedup cache.
#[derive(Clone, Debug)]
pub struct DedupConfig {
    /// Expected number of distinct keys.
    pub capacity: usize,
    /// Target false-positive rate at `capacity`.
    pub false_positive_rate: f64,
    /// Back the filter with an exact set.
    pub strict: bool,
    /// Snapshot file location.
    pub state_path: String,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            capacity: 65_535,
            false_positive_rate: 0.1,
            strict: false,
            state_path: "data/dedup.bin".to_string(),
        }
    }
}

/// Errors from saving or restoring dedup state.
#[derive(Debug)]
pub enum DedupError {
    Encode(String),
    Decode(String),
    VersionMismatch { found: u32, expected: u32 },
    Io(std::io::Error),
}

impl From<std::io::Error> for DedupError {
    fn from(e: std::io::Error) -> Self {
        DedupError::Io(e)
    }
}

impl fmt::Display for DedupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupError::Encode(msg) => write!(f, "dedup snapshot encode failed: {msg}"),
            DedupError::Decode(msg) => write!(f, "dedup snapshot decode failed: {msg}"),
            DedupError::VersionMismatch { found, expected } => write!(
                f,
                "dedup snapshot version {found} does not match expected {expected}"
            ),
            DedupError::Io(e) => write!(f, "dedup snapshot I/O error: {e}"),
        }
    }
}

impl std::error::Error for DedupError {}
