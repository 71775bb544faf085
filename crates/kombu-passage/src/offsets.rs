//! Offset table file format.
//!
//! Layout (little-endian throughout):
//! ```text
//! magic(4) = "LPX1" | version(u32) | N(u64) | off[0..N](u64) | off[N](u64)
//! ```
//! The trailing offset is a sentinel equal to the jsonl byte size, so record
//! `i` spans `[off[i], off[i+1])`.

use crate::{PassageError, Result};

/// Offset table magic, "LPX1".
pub const OFFSETS_MAGIC: [u8; 4] = *b"LPX1";

/// Current offset table format version.
pub const OFFSETS_VERSION: u32 = 1;

/// Size of the fixed header preceding the offsets.
const HEADER_SIZE: usize = 16;

/// Decoded offset table: `N + 1` monotone byte offsets into the jsonl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetTable {
    offsets: Vec<u64>,
}

impl OffsetTable {
    /// Build a table from record offsets plus the jsonl size sentinel.
    ///
    /// `record_offsets` holds the starting byte of each record in append
    /// order.
    pub fn new(record_offsets: Vec<u64>, jsonl_size: u64) -> Self {
        let mut offsets = record_offsets;
        offsets.push(jsonl_size);
        Self { offsets }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sentinel offset (jsonl byte size at write time).
    pub fn sentinel(&self) -> u64 {
        *self.offsets.last().expect("table always holds a sentinel")
    }

    /// Byte span `[start, end)` of record `n`.
    pub fn span(&self, n: u32) -> Result<(u64, u64)> {
        let i = n as usize;
        if i >= self.len() {
            return Err(PassageError::OutOfRange {
                node: n,
                len: self.len(),
            });
        }
        Ok((self.offsets[i], self.offsets[i + 1]))
    }

    /// Encode header + offsets.
    pub fn encode(&self) -> Vec<u8> {
        let n = self.len() as u64;
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.offsets.len() * 8);
        buf.extend_from_slice(&OFFSETS_MAGIC);
        buf.extend_from_slice(&OFFSETS_VERSION.to_le_bytes());
        buf.extend_from_slice(&n.to_le_bytes());
        for off in &self.offsets {
            buf.extend_from_slice(&off.to_le_bytes());
        }
        buf
    }

    /// Decode and validate a table.
    ///
    /// Checks magic, version, length, and offset monotonicity.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(PassageError::Corrupt(format!(
                "offset table truncated: {} bytes",
                buf.len()
            )));
        }
        if buf[0..4] != OFFSETS_MAGIC {
            return Err(PassageError::Corrupt(format!(
                "bad offset table magic: {:02x?}",
                &buf[0..4]
            )));
        }
        let version = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if version != OFFSETS_VERSION {
            return Err(PassageError::Corrupt(format!(
                "unsupported offset table version: {}",
                version
            )));
        }
        let n = u64::from_le_bytes([
            buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
        ]) as usize;

        let expected = HEADER_SIZE + (n + 1) * 8;
        if buf.len() != expected {
            return Err(PassageError::Corrupt(format!(
                "offset table holds {} bytes, expected {} for {} records",
                buf.len(),
                expected,
                n
            )));
        }

        let mut offsets = Vec::with_capacity(n + 1);
        for i in 0..=n {
            let at = HEADER_SIZE + i * 8;
            let off = u64::from_le_bytes([
                buf[at],
                buf[at + 1],
                buf[at + 2],
                buf[at + 3],
                buf[at + 4],
                buf[at + 5],
                buf[at + 6],
                buf[at + 7],
            ]);
            if let Some(&prev) = offsets.last() {
                if off < prev {
                    return Err(PassageError::Corrupt(format!(
                        "offsets not monotone at record {}: {} < {}",
                        i, off, prev
                    )));
                }
            }
            offsets.push(off);
        }

        Ok(Self { offsets })
    }
}
