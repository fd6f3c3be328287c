use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{BloomFilter, DedupConfig, DedupError};

/// Snapshot format version. Bump when the serialized layout changes.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Duplicate-suppression cache keyed by submission key.
///
/// A bloom filter answers most lookups. In strict mode an exact set sits
/// behind it and removes false positives at the cost of memory.
///
/// The cache is not internally synchronized; the pipeline coordinator is
/// its only writer.
#[derive(Clone, Debug)]
pub struct DedupCache {
    filter: BloomFilter,
    exact: Option<HashSet<String>>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    filter: BloomFilter,
    exact: Option<Vec<String>>,
}

impl DedupCache {
    /// Creates an empty cache sized from `cfg`.
    pub fn new(cfg: &DedupConfig) -> Self {
        Self {
            filter: BloomFilter::with_capacity(cfg.capacity, cfg.false_positive_rate),
            exact: cfg.strict.then(HashSet::new),
        }
    }

    /// Returns `true` if `key` has (probably) been added before.
    ///
    /// Never returns `false` for an added key.
    pub fn has(&self, key: &str) -> bool {
        if !self.filter.may_contain(key.as_bytes()) {
            return false;
        }
        match &self.exact {
            Some(set) => set.contains(key),
            None => true,
        }
    }

    pub fn add(&mut self, key: &str) {
        self.filter.insert(key.as_bytes());
        if let Some(set) = &mut self.exact {
            set.insert(key.to_string());
        }
    }

    pub fn is_strict(&self) -> bool {
        self.exact.is_some()
    }

    /// Number of `add` calls recorded by the filter.
    pub fn inserted(&self) -> u64 {
        self.filter.inserted()
    }

    pub fn filter(&self) -> &BloomFilter {
        &self.filter
    }

    /// Serializes the full cache state.
    pub fn save(&self) -> Result<Vec<u8>, DedupError> {
        let exact = self.exact.as_ref().map(|set| {
            let mut keys: Vec<String> = set.iter().cloned().collect();
            keys.sort_unstable();
            keys
        });

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            filter: self.filter.clone(),
            exact,
        };

        bincode::serde::encode_to_vec(&snapshot, bincode::config::standard())
            .map_err(|e| DedupError::Encode(e.to_string()))
    }

    /// Replaces this cache's state with a previously saved snapshot.
    ///
    /// On error the current state is left untouched.
    pub fn load(&mut self, bytes: &[u8]) -> Result<(), DedupError> {
        *self = Self::from_bytes(bytes)?;
        Ok(())
    }

    /// Decodes a cache from a snapshot produced by [`DedupCache::save`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DedupError> {
        let (snapshot, _): (Snapshot, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| DedupError::Decode(e.to_string()))?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(DedupError::VersionMismatch {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        if !snapshot.filter.is_consistent() {
            return Err(DedupError::Decode("inconsistent filter shape".into()));
        }

        Ok(Self {
            filter: snapshot.filter,
            exact: snapshot.exact.map(|keys| keys.into_iter().collect()),
        })
    }
}
