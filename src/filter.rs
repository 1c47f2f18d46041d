//! Per-SST bloom filter.
//!
//! A bloom filter answers "is this key possibly in the table" with no false
//! negatives and a tunable false-positive rate. Each SST carries one filter
//! covering all of its keys, letting point lookups skip tables without
//! touching their index or values.
//!
//! The `k` bit positions for a key are synthesized from two independent
//! 64-bit base hashes via double hashing (`h1 + i * h2 mod m`). The base
//! hashes are CRC-64 checksums with two different polynomials: CRC is stable
//! across platforms and process restarts, which a filter persisted inside an
//! SST file requires.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_64_ECMA_182, CRC_64_XZ};

use crate::error::{Error, Result};

/// Expected keys per table, sized for the default 2 MiB split.
pub const EXPECTED_TABLE_ITEMS: usize = 64 * 1024;

/// Target false-positive rate per table.
pub const TARGET_FP_RATE: f64 = 0.01;

// Bit arrays larger than this are rejected on decode as corrupt.
const MAX_FILTER_BYTES: u64 = 64 * 1024 * 1024;

fn base_hashes(data: &[u8]) -> (u64, u64) {
    let h1 = Crc::<u64>::new(&CRC_64_ECMA_182).checksum(data);
    let h2 = Crc::<u64>::new(&CRC_64_XZ).checksum(data);
    (h1, h2)
}

/// An approximate-membership filter over byte strings.
#[derive(Clone, Debug)]
pub struct Filter {
    bits: Vec<u8>,
    m_bits: u64,
    k_hashes: u32,
}

impl Filter {
    /// Create a filter with `m_bits` bits and `k_hashes` hash functions.
    /// Both are forced to at least one.
    pub fn new(m_bits: u64, k_hashes: u32) -> Self {
        let m_bits = m_bits.max(1);
        Self {
            bits: vec![0u8; (m_bits as usize).div_ceil(8)],
            m_bits,
            k_hashes: k_hashes.max(1),
        }
    }

    /// Create a filter sized for `expected_items` keys at the given
    /// false-positive rate, using the standard formulas
    /// `m = -n·ln p / (ln 2)²` and `k = (m/n)·ln 2`.
    pub fn with_rate(expected_items: usize, fp_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let m = (-(n * fp_rate.ln()) / (ln2 * ln2)).ceil() as u64;
        let k = ((m as f64 / n) * ln2).ceil() as u32;
        Self::new(m, k)
    }

    /// Add a key to the filter.
    pub fn add(&mut self, data: &[u8]) {
        let (h1, h2) = base_hashes(data);
        for i in 0..self.k_hashes {
            let bit = self.bit_position(h1, h2, i);
            self.bits[(bit / 8) as usize] |= 1 << (bit % 8);
        }
    }

    /// Returns false only if the key is definitely not in the filter.
    pub fn may_contain(&self, data: &[u8]) -> bool {
        let (h1, h2) = base_hashes(data);
        for i in 0..self.k_hashes {
            let bit = self.bit_position(h1, h2, i);
            if self.bits[(bit / 8) as usize] >> (bit % 8) & 1 == 0 {
                return false;
            }
        }
        true
    }

    fn bit_position(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.m_bits
    }

    /// Serialize as `m` (u64), `k` (u64), then the length-prefixed bit array.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u64::<LittleEndian>(self.m_bits)
            .map_err(|e| Error::io("write", e))?;
        w.write_u64::<LittleEndian>(self.k_hashes as u64)
            .map_err(|e| Error::io("write", e))?;
        w.write_u64::<LittleEndian>(self.bits.len() as u64)
            .map_err(|e| Error::io("write", e))?;
        w.write_all(&self.bits).map_err(|e| Error::io("write", e))
    }

    /// Inverse of [`Filter::write_to`].
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let m_bits = r
            .read_u64::<LittleEndian>()
            .map_err(|e| Error::decode("filter", e))?;
        let k_hashes = r
            .read_u64::<LittleEndian>()
            .map_err(|e| Error::decode("filter", e))?;
        let len = r
            .read_u64::<LittleEndian>()
            .map_err(|e| Error::decode("filter", e))?;
        if m_bits == 0 || len > MAX_FILTER_BYTES || len != (m_bits.div_ceil(8)) {
            return Err(Error::decode(
                "filter",
                format!("inconsistent parameters: m = {m_bits}, byte length = {len}"),
            ));
        }
        let mut bits = vec![0u8; len as usize];
        r.read_exact(&mut bits)
            .map_err(|e| Error::decode("filter", e))?;
        Ok(Self {
            bits,
            m_bits,
            k_hashes: k_hashes as u32,
        })
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::with_rate(EXPECTED_TABLE_ITEMS, TARGET_FP_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_false_negatives() {
        let mut filter = Filter::with_rate(1000, 0.01);
        for i in 0..1000 {
            filter.add(format!("key_{i}").as_bytes());
        }
        for i in 0..1000 {
            assert!(
                filter.may_contain(format!("key_{i}").as_bytes()),
                "false negative for key_{i}"
            );
        }
    }

    #[test]
    fn test_false_positive_rate_is_bounded() {
        let mut filter = Filter::with_rate(1000, 0.01);
        for i in 0..1000 {
            filter.add(format!("key_{i}").as_bytes());
        }

        let mut false_positives = 0;
        for i in 1000..11000 {
            if filter.may_contain(format!("key_{i}").as_bytes()) {
                false_positives += 1;
            }
        }
        let rate = false_positives as f64 / 10000.0;
        assert!(rate < 0.05, "false positive rate too high: {rate}");
    }

    #[test]
    fn test_round_trip() {
        let mut filter = Filter::with_rate(100, 0.01);
        for i in 0..100 {
            filter.add(format!("item_{i}").as_bytes());
        }

        let mut buf = Vec::new();
        filter.write_to(&mut buf).expect("write failed");
        let restored = Filter::read_from(&mut buf.as_slice()).expect("read failed");

        for i in 0..100 {
            assert!(restored.may_contain(format!("item_{i}").as_bytes()));
        }
        assert_eq!(restored.m_bits, filter.m_bits);
        assert_eq!(restored.k_hashes, filter.k_hashes);
    }

    #[test]
    fn test_read_rejects_inconsistent_length() {
        let filter = Filter::new(64, 3);
        let mut buf = Vec::new();
        filter.write_to(&mut buf).expect("write failed");

        // Corrupt the byte-length field.
        buf[16] ^= 0xff;
        assert!(Filter::read_from(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn test_with_rate_parameters() {
        // n = 1000, p = 0.01 gives m ≈ 9586 bits and k = 7.
        let filter = Filter::with_rate(1000, 0.01);
        assert!(filter.m_bits > 9000 && filter.m_bits < 10000);
        assert_eq!(filter.k_hashes, 7);
    }
}
