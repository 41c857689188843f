//! Bloom filter geometry and bit positions
//!
//! Storage lives elsewhere (the marker tables in citecrawl-store); this module
//! only decides how many bits/hashes a filter gets and which bits a key sets.
//! Positions come from one blake3 digest split into two 64-bit halves
//! (Kirsch-Mitzenmacher double hashing), so every process computes the same
//! bits for the same key.

use std::f64::consts::LN_2;

/// Bits per storage word.
pub const WORD_BITS: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloomParams {
    pub num_bits: u64,
    pub num_hashes: u32,
}

impl BloomParams {
    /// Optimal geometry for `capacity` items at false-positive rate `fp_rate`.
    ///
    /// m = -n ln p / (ln 2)^2, k = (m / n) ln 2, both rounded up to at least
    /// one word and one hash.
    pub fn for_capacity(capacity: u64, fp_rate: f64) -> Self {
        let n = capacity.max(1) as f64;
        let p = fp_rate.clamp(f64::MIN_POSITIVE, 0.5);
        let m = (-n * p.ln() / (LN_2 * LN_2)).ceil().max(WORD_BITS as f64);
        let num_bits = (m as u64).div_ceil(WORD_BITS) * WORD_BITS;
        let k = ((num_bits as f64 / n) * LN_2).round().clamp(1.0, 32.0);
        Self {
            num_bits,
            num_hashes: k as u32,
        }
    }

    pub fn num_words(&self) -> u64 {
        self.num_bits / WORD_BITS
    }

    /// Bit positions for `key`, `num_hashes` of them, each `< num_bits`.
    pub fn positions<'a>(&'a self, key: &str) -> impl Iterator<Item = u64> + 'a {
        let digest = blake3::hash(key.as_bytes());
        let bytes = digest.as_bytes();
        let h1 = u64::from_le_bytes(bytes[0..8].try_into().unwrap_or_default());
        // Odd step so successive probes never collapse onto one bit
        let h2 = u64::from_le_bytes(bytes[8..16].try_into().unwrap_or_default()) | 1;
        (0..u64::from(self.num_hashes))
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits)
    }

    /// `(word index, mask)` pairs covering every bit of `key`.
    pub fn words<'a>(&'a self, key: &str) -> impl Iterator<Item = (u64, u64)> + 'a {
        self.positions(key)
            .map(|bit| (bit / WORD_BITS, 1u64 << (bit % WORD_BITS)))
    }
}
