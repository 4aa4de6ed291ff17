//! Bloom filter over string keys.
//!
//! Sized from a design capacity `n` and a target false-positive rate `p`:
//!
//! ```text
//! m = ceil(-n · ln(p) / (ln 2)²)     bits
//! k = ceil((m / n) · ln 2)           hash functions
//! ```
//!
//! Bit positions come from enhanced double hashing over three independent
//! base hashes. `pos_0 = h1`, `pos_1 = h2`, and for `i ≥ 2`
//! `pos_i = h1 + i·h2 + i²·h3`, all reduced mod `m`.
//!
//! # Wire format
//!
//! ```text
//! "IDBF" | version u8 | m u64 LE | k u32 LE | n u64 LE | p f64 LE | bits
//! ```

// Sizing math runs in f64 and is rounded back to integer widths on purpose.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use crate::{Error, Result};
use std::f64::consts::LN_2;

const MAGIC: &[u8; 4] = b"IDBF";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 8 + 4 + 8 + 8;

/// Largest bit array a filter may request: 2^33 bits, 1 GiB of storage.
pub const MAX_BITS: u64 = 1 << 33;

/// `(seed, multiplier)` per base hash.
const BASE_HASHES: [(u64, u64); 3] = [
    (0x517c_c1b7_2722_0a95, 0x0000_0100_0000_01b3),
    (0x6d0f_27bd_ceb7_b067, 0x9e37_79b9_7f4a_7c15),
    (0x9e37_79b1_85eb_ca87, 0xc2b2_ae3d_27d4_eb4f),
];

/// Fixed-size probabilistic set.
///
/// No false negatives: once [`add`](Self::add) returns, [`might_contain`]
/// answers true for that item until [`clear`](Self::clear).
///
/// [`might_contain`]: Self::might_contain
#[derive(Debug, Clone, PartialEq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: u64,
    num_hashes: u32,
    expected_items: u64,
    false_positive_rate: f64,
}

impl BloomFilter {
    /// Creates an empty filter sized for `expected_items` at `false_positive_rate`.
    ///
    /// # Arguments
    ///
    /// * `expected_items` - Design capacity `n`; must be positive
    /// * `false_positive_rate` - Target rate `p`; must lie strictly in `(0, 1)`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] when `n` is zero, `p` is out of
    /// range (including NaN), or the resulting `m` exceeds [`MAX_BITS`] or
    /// cannot be allocated.
    ///
    /// # Example
    ///
    /// ```rust
    /// use imgdedup::services::deduplication::BloomFilter;
    ///
    /// let filter = BloomFilter::new(10_000, 0.01).unwrap();
    /// assert_eq!(filter.num_bits(), 95_851);
    /// assert_eq!(filter.num_hashes(), 7);
    /// ```
    pub fn new(expected_items: u64, false_positive_rate: f64) -> Result<Self> {
        let (num_bits, num_hashes) = sizing(expected_items, false_positive_rate)?;
        let len = byte_len(num_bits)?;
        let mut bits = Vec::new();
        bits.try_reserve_exact(len).map_err(|e| {
            Error::InvalidParameter(format!("bloom filter of {num_bits} bits: {e}"))
        })?;
        bits.resize(len, 0u8);

        Ok(Self {
            bits,
            num_bits,
            num_hashes,
            expected_items,
            false_positive_rate,
        })
    }

    /// Records `item`. Idempotent.
    pub fn add(&mut self, item: &str) {
        let hashes = base_hashes(item.as_bytes());
        for i in 0..self.num_hashes {
            let pos = self.position(hashes, i);
            self.bits[(pos / 8) as usize] |= 1 << (pos % 8);
        }
    }

    /// Returns true if `item` may have been added; false means definitely not.
    #[must_use]
    pub fn might_contain(&self, item: &str) -> bool {
        let hashes = base_hashes(item.as_bytes());
        (0..self.num_hashes).all(|i| {
            let pos = self.position(hashes, i);
            self.bits[(pos / 8) as usize] & (1 << (pos % 8)) != 0
        })
    }

    /// Zeroes every bit. Parameters are unchanged.
    pub fn clear(&mut self) {
        self.bits.fill(0);
    }

    /// Fraction of bits currently set, in `[0, 1]`.
    #[must_use]
    pub fn fill_ratio(&self) -> f64 {
        let set: u64 = self.bits.iter().map(|b| u64::from(b.count_ones())).sum();
        set as f64 / self.num_bits as f64
    }

    /// Bit-array size `m`.
    #[must_use]
    pub const fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Hash-function count `k`.
    #[must_use]
    pub const fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Design capacity `n`.
    #[must_use]
    pub const fn expected_items(&self) -> u64 {
        self.expected_items
    }

    /// Target false-positive rate `p`.
    #[must_use]
    pub const fn false_positive_rate(&self) -> f64 {
        self.false_positive_rate
    }

    /// Returns true when this filter was built for the given `(n, p)`.
    #[must_use]
    pub fn has_parameters(&self, expected_items: u64, false_positive_rate: f64) -> bool {
        self.expected_items == expected_items
            && self.false_positive_rate.to_bits() == false_positive_rate.to_bits()
    }

    /// Encodes the filter, parameters included.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.bits.len());
        out.extend_from_slice(MAGIC);
        out.push(FORMAT_VERSION);
        out.extend_from_slice(&self.num_bits.to_le_bytes());
        out.extend_from_slice(&self.num_hashes.to_le_bytes());
        out.extend_from_slice(&self.expected_items.to_le_bytes());
        out.extend_from_slice(&self.false_positive_rate.to_le_bytes());
        out.extend_from_slice(&self.bits);
        out
    }

    /// Decodes a filter produced by [`serialize`](Self::serialize).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the magic, version, or buffer
    /// length do not check out, or if `m` and `k` disagree with the sizing
    /// for the stored `(n, p)`.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(invalid(format!(
                "bloom snapshot too short: {} bytes",
                data.len()
            )));
        }
        let (header, bits) = data.split_at(HEADER_LEN);
        if &header[..4] != MAGIC {
            return Err(invalid("bloom snapshot has wrong magic".to_string()));
        }
        if header[4] != FORMAT_VERSION {
            return Err(invalid(format!(
                "unsupported bloom snapshot version {}",
                header[4]
            )));
        }

        let num_bits = u64::from_le_bytes(le_array(&header[5..13])?);
        let num_hashes = u32::from_le_bytes(le_array(&header[13..17])?);
        let expected_items = u64::from_le_bytes(le_array(&header[17..25])?);
        let false_positive_rate = f64::from_le_bytes(le_array(&header[25..33])?);

        let (want_bits, want_hashes) = sizing(expected_items, false_positive_rate)
            .map_err(|e| invalid(format!("bloom snapshot parameters: {e}")))?;
        if num_bits != want_bits || num_hashes != want_hashes {
            return Err(invalid(format!(
                "bloom snapshot has m={num_bits}, k={num_hashes}; \
                 n={expected_items}, p={false_positive_rate} gives m={want_bits}, k={want_hashes}"
            )));
        }
        let expected_len = byte_len(num_bits)?;
        if bits.len() != expected_len {
            return Err(invalid(format!(
                "bloom snapshot carries {} bytes of bits, expected {expected_len}",
                bits.len()
            )));
        }

        Ok(Self {
            bits: bits.to_vec(),
            num_bits,
            num_hashes,
            expected_items,
            false_positive_rate,
        })
    }

    fn position(&self, (h1, h2, h3): (u64, u64, u64), i: u32) -> u64 {
        let raw = match i {
            0 => h1,
            1 => h2,
            _ => {
                let i = u64::from(i);
                h1.wrapping_add(i.wrapping_mul(h2))
                    .wrapping_add(i.wrapping_mul(i).wrapping_mul(h3))
            },
        };
        raw % self.num_bits
    }
}

fn validate_parameters(expected_items: u64, false_positive_rate: f64) -> Result<()> {
    if expected_items == 0 {
        return Err(Error::InvalidParameter(
            "bloom expected elements must be positive".to_string(),
        ));
    }
    if !(false_positive_rate > 0.0 && false_positive_rate < 1.0) {
        return Err(Error::InvalidParameter(format!(
            "bloom false-positive rate must be in (0, 1), got {false_positive_rate}"
        )));
    }
    Ok(())
}

/// Computes `(m, k)` for `(n, p)`, bounded by [`MAX_BITS`].
fn sizing(expected_items: u64, false_positive_rate: f64) -> Result<(u64, u32)> {
    validate_parameters(expected_items, false_positive_rate)?;

    let n = expected_items as f64;
    let m = (-n * false_positive_rate.ln() / (LN_2 * LN_2)).ceil().max(1.0);
    if m > MAX_BITS as f64 {
        return Err(Error::InvalidParameter(format!(
            "bloom filter for n={expected_items}, p={false_positive_rate} needs {m} bits, \
             limit is {MAX_BITS}"
        )));
    }
    let k = ((m / n) * LN_2).ceil().max(1.0);
    Ok((m as u64, k.min(f64::from(u32::MAX)) as u32))
}

fn byte_len(num_bits: u64) -> Result<usize> {
    usize::try_from(num_bits.div_ceil(8)).map_err(|_| {
        Error::InvalidParameter(format!("bloom filter of {num_bits} bits does not fit in memory"))
    })
}

fn le_array<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| invalid("bloom snapshot header truncated".to_string()))
}

fn invalid(message: String) -> Error {
    Error::InvalidInput(message)
}

fn base_hashes(data: &[u8]) -> (u64, u64, u64) {
    (
        accumulate(data, BASE_HASHES[0]),
        accumulate(data, BASE_HASHES[1]),
        accumulate(data, BASE_HASHES[2]),
    )
}

/// Polynomial accumulator finished with the murmur3 64-bit avalanche.
fn accumulate(data: &[u8], (seed, multiplier): (u64, u64)) -> u64 {
    let mut hash = seed ^ (data.len() as u64);
    for &byte in data {
        hash = hash.wrapping_mul(multiplier).wrapping_add(u64::from(byte));
    }
    fmix64(hash)
}

const fn fmix64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_sizing_for_defaults() {
        let filter = BloomFilter::new(10_000, 0.01).unwrap();
        assert_eq!(filter.num_bits(), 95_851);
        assert_eq!(filter.num_hashes(), 7);
        assert_eq!(filter.bits.len(), 11_982);
        assert!(filter.fill_ratio().abs() < f64::EPSILON);
    }

    #[test_case(0, 0.01 ; "zero capacity")]
    #[test_case(100, 0.0 ; "zero rate")]
    #[test_case(100, 1.0 ; "rate of one")]
    #[test_case(100, -0.5 ; "negative rate")]
    #[test_case(100, f64::NAN ; "nan rate")]
    #[test_case(1_000_000_000_000_000, 0.01 ; "capacity beyond bit limit")]
    #[test_case(1_000_000_000, 1e-10 ; "rate beyond bit limit")]
    fn test_rejects_bad_parameters(n: u64, p: f64) {
        let result = BloomFilter::new(n, p);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_no_false_negatives() {
        let mut filter = BloomFilter::new(1_000, 0.01).unwrap();
        let items: Vec<String> = (0..1_000).map(|i| format!("item_{i}")).collect();
        for item in &items {
            filter.add(item);
        }
        for item in &items {
            assert!(filter.might_contain(item), "false negative for {item}");
        }
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut filter = BloomFilter::new(100, 0.01).unwrap();
        filter.add("same");
        let once = filter.clone();
        filter.add("same");
        assert_eq!(filter, once);
    }

    #[test]
    fn test_false_positive_rate_at_design_load() {
        let mut filter = BloomFilter::new(10_000, 0.01).unwrap();
        for i in 0..10_000 {
            filter.add(&format!("https://cdn.example.com/inserted/{i}.jpg"));
        }

        let false_positives = (0..10_000)
            .filter(|i| filter.might_contain(&format!("https://cdn.example.com/probe/{i}.jpg")))
            .count();
        let rate = false_positives as f64 / 10_000.0;
        assert!(rate < 0.02, "false-positive rate too high: {rate}");
    }

    #[test]
    fn test_clear_resets_bits_only() {
        let mut filter = BloomFilter::new(100, 0.05).unwrap();
        filter.add("a");
        filter.add("b");
        assert!(filter.fill_ratio() > 0.0);

        filter.clear();
        assert!(!filter.might_contain("a"));
        assert!(!filter.might_contain("b"));
        assert!(filter.fill_ratio().abs() < f64::EPSILON);
        assert!(filter.has_parameters(100, 0.05));
    }

    #[test]
    fn test_serialize_roundtrip_preserves_answers() {
        let mut filter = BloomFilter::new(500, 0.01).unwrap();
        for i in 0..300 {
            filter.add(&format!("digest-{i}"));
        }

        let restored = BloomFilter::deserialize(&filter.serialize()).unwrap();
        assert_eq!(restored, filter);
        assert!((restored.fill_ratio() - filter.fill_ratio()).abs() < f64::EPSILON);
        for i in 0..300 {
            assert!(restored.might_contain(&format!("digest-{i}")));
        }
    }

    #[test]
    fn test_deserialize_rejects_bad_magic() {
        let mut bytes = BloomFilter::new(10, 0.1).unwrap().serialize();
        bytes[0] = b'X';
        assert!(matches!(
            BloomFilter::deserialize(&bytes),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_deserialize_rejects_truncated_bits() {
        let mut bytes = BloomFilter::new(10, 0.1).unwrap().serialize();
        bytes.pop();
        assert!(matches!(
            BloomFilter::deserialize(&bytes),
            Err(Error::InvalidInput(_))
        ));
        assert!(BloomFilter::deserialize(&bytes[..10]).is_err());
    }

    #[test_case(13, &u32::MAX.to_le_bytes() ; "huge hash count")]
    #[test_case(13, &3u32.to_le_bytes() ; "hash count off formula")]
    #[test_case(5, &96_000u64.to_le_bytes() ; "bit count off formula")]
    fn test_deserialize_rejects_inconsistent_sizing(offset: usize, patch: &[u8]) {
        let mut bytes = BloomFilter::new(10_000, 0.01).unwrap().serialize();
        bytes[offset..offset + patch.len()].copy_from_slice(patch);
        assert!(matches!(
            BloomFilter::deserialize(&bytes),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_deserialize_rejects_unknown_version() {
        let mut bytes = BloomFilter::new(10, 0.1).unwrap().serialize();
        bytes[4] = 9;
        assert!(BloomFilter::deserialize(&bytes).is_err());
    }
}
