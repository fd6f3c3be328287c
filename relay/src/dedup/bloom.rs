//! Analytically sized bloom filter.
//!
//! For an expected item count `n` and target false-positive rate `p`:
//!
//! - bit count `m = ceil(n * |ln p| / (ln 2)^2)`
//! - hash count `k = max(1, round((m / n) * ln 2))`
//!
//! Bit positions use double hashing, `h_i(x) = h1(x) + i * h2(x) mod m`,
//! with `h1` and `h2` taken from one BLAKE3 digest of the key.

use std::f64::consts::LN_2;

use serde::{Deserialize, Serialize};

const WORD_BITS: u64 = 64;
const MIN_BITS: u64 = WORD_BITS;

/// A space-efficient probabilistic set.
///
/// `may_contain` never returns `false` for a key that was inserted; it
/// may return `true` for a key that was not.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomFilter {
    words: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
    inserted: u64,
}

impl BloomFilter {
    /// Creates an empty filter sized for `expected_items` at rate `fp_rate`.
    ///
    /// `expected_items` is raised to at least 1 and `fp_rate` is clamped
    /// into `(0, 0.5]`.
    pub fn with_capacity(expected_items: usize, fp_rate: f64) -> Self {
        let (num_bits, num_hashes) = Self::optimal_params(expected_items, fp_rate);
        let word_count = num_bits.div_ceil(WORD_BITS) as usize;

        Self {
            words: vec![0u64; word_count],
            num_bits,
            num_hashes,
            inserted: 0,
        }
    }

    /// Returns `(m, k)` for the given capacity and rate.
    pub fn optimal_params(expected_items: usize, fp_rate: f64) -> (u64, u32) {
        let n = expected_items.max(1) as f64;
        let p = if fp_rate.is_finite() {
            fp_rate.clamp(f64::MIN_POSITIVE, 0.5)
        } else {
            0.5
        };

        let m = (n * p.ln().abs() / (LN_2 * LN_2)).ceil();
        let num_bits = (m as u64).max(MIN_BITS);
        let k = ((num_bits as f64 / n) * LN_2).round();
        let num_hashes = (k as u32).max(1);

        (num_bits, num_hashes)
    }

    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = Self::hash_pair(key);
        for i in 0..self.num_hashes {
            let bit = self.bit_index(h1, h2, i);
            self.words[(bit / WORD_BITS) as usize] |= 1u64 << (bit % WORD_BITS);
        }
        self.inserted = self.inserted.saturating_add(1);
    }

    /// Returns `false` only if `key` was definitely never inserted.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = Self::hash_pair(key);
        (0..self.num_hashes).all(|i| {
            let bit = self.bit_index(h1, h2, i);
            self.words[(bit / WORD_BITS) as usize] & (1u64 << (bit % WORD_BITS)) != 0
        })
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Number of `insert` calls so far, including repeats.
    pub fn inserted(&self) -> u64 {
        self.inserted
    }

    /// Checks the internal shape after deserialization.
    pub(crate) fn is_consistent(&self) -> bool {
        self.num_hashes > 0
            && self.num_bits > 0
            && self.words.len() as u64 == self.num_bits.div_ceil(WORD_BITS)
    }

    fn hash_pair(key: &[u8]) -> (u64, u64) {
        let digest = blake3::hash(key);
        let bytes = digest.as_bytes();

        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&bytes[0..8]);
        hi.copy_from_slice(&bytes[8..16]);

        // An odd step keeps successive bit positions from collapsing onto one bit.
        (u64::from_le_bytes(lo), u64::from_le_bytes(hi) | 1)
    }

    fn bit_index(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add(u64::from(i).wrapping_mul(h2)) % self.num_bits
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set_bits: u32 = self.words.iter().map(|w| w.count_ones()).sum();
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .field("set_bits", &set_bits)
            .field("inserted", &self.inserted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_follow_analytic_formula() {
        let (m, k) = BloomFilter::optimal_params(1_000, 0.01);
        // 1000 * ln(100) / ln(2)^2 = 9585.06
        assert_eq!(m, 9_586);
        assert_eq!(k, 7);

        let (_, k) = BloomFilter::optimal_params(65_535, 0.1);
        assert_eq!(k, 3);
    }

    #[test]
    fn degenerate_inputs_are_clamped() {
        let bf = BloomFilter::with_capacity(0, 0.0);
        assert!(bf.num_bits() >= MIN_BITS);
        assert!(bf.num_hashes() >= 1);

        let bf = BloomFilter::with_capacity(10, f64::NAN);
        assert!(bf.num_hashes() >= 1);
    }

    #[test]
    fn empty_filter_contains_nothing() {
        let bf = BloomFilter::with_capacity(100, 0.01);
        assert!(!bf.may_contain(b"anything"));
        assert_eq!(bf.inserted(), 0);
    }

    #[test]
    fn no_false_negatives() {
        let mut bf = BloomFilter::with_capacity(2_000, 0.05);
        for i in 0u32..2_000 {
            bf.insert(format!("key-{i}").as_bytes());
        }
        for i in 0u32..2_000 {
            assert!(bf.may_contain(format!("key-{i}").as_bytes()), "key-{i}");
        }
    }

    #[test]
    fn false_positive_rate_stays_near_target() {
        let target = 0.01;
        let mut bf = BloomFilter::with_capacity(1_000, target);
        for i in 0u32..1_000 {
            bf.insert(format!("in-{i}").as_bytes());
        }

        let trials = 20_000u32;
        let hits = (0..trials)
            .filter(|i| bf.may_contain(format!("out-{i}").as_bytes()))
            .count();
        let rate = hits as f64 / f64::from(trials);

        assert!(rate <= target * 2.0, "observed fp rate {rate}");
    }

    #[test]
    fn serde_roundtrip_preserves_membership() {
        let mut bf = BloomFilter::with_capacity(64, 0.01);
        for i in 0u8..32 {
            bf.insert(&[i]);
        }

        let bytes = bincode::serde::encode_to_vec(&bf, bincode::config::standard())
            .expect("encode bloom filter");
        let (back, _): (BloomFilter, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .expect("decode bloom filter");

        assert!(back.is_consistent());
        assert_eq!(back, bf);
        for i in 0u8..32 {
            assert!(back.may_contain(&[i]));
        }
    }
}
