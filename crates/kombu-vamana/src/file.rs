//! Vamana graph file format.
//!
//! Layout (little-endian):
//! ```text
//! magic(4) = "LVM1" | version(u32) | N(u64) | R(u32) | entry_point(u32)
//! | slots: N × R × u32, each node's neighbors in distance order,
//!   u32::MAX-padded
//! | crc32c(u32) over everything preceding it
//! ```
//!
//! Fixed-width slots make a node's whole neighborhood a single aligned read
//! at a computable offset, which is what a memory-mapped reader wants.

use crate::builder::VamanaGraph;
use crate::{Result, VamanaError};
use bytes::{Buf, BufMut, BytesMut};
use kombu_vector::NodeId;
use memmap2::Mmap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Vamana file magic, "LVM1".
pub const VAMANA_MAGIC: [u8; 4] = *b"LVM1";

/// Current Vamana file format version.
pub const VAMANA_VERSION: u32 = 1;

const HEADER_SIZE: usize = 24;

/// Slot filler for absent neighbors.
const EMPTY_SLOT: u32 = u32::MAX;

/// Serialize a graph to `path`, atomically (temp + rename).
pub fn write_graph(graph: &VamanaGraph, path: impl AsRef<Path>) -> Result<()> {
    let n = graph.len();
    let r = graph.r as usize;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + n * r * 4 + 4);
    buf.put_slice(&VAMANA_MAGIC);
    buf.put_u32_le(VAMANA_VERSION);
    buf.put_u64_le(n as u64);
    buf.put_u32_le(graph.r);
    buf.put_u32_le(graph.entry_point);

    for list in &graph.links {
        for &nb in list {
            buf.put_u32_le(nb);
        }
        for _ in list.len()..r {
            buf.put_u32_le(EMPTY_SLOT);
        }
    }

    let crc = crc32c::crc32c(&buf);
    buf.put_u32_le(crc);

    let path = path.as_ref();
    let tmp = path.with_extension("graph.tmp");
    {
        let mut f = File::create(&tmp)?;
        f.write_all(&buf)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;

    tracing::debug!(nodes = n, r = graph.r, bytes = buf.len(), "vamana graph written");
    Ok(())
}

/// Read-only, memory-mapped view of a Vamana graph file.
pub struct VamanaFile {
    mmap: Mmap,
    n: usize,
    r: usize,
    entry_point: NodeId,
}

impl VamanaFile {
    /// Open and bounds-check a graph file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        // Safety: the index directory owns the file and builders replace it
        // atomically; it is never truncated while mapped.
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < HEADER_SIZE + 4 {
            return Err(VamanaError::Corrupt(format!(
                "graph file truncated: {} bytes",
                mmap.len()
            )));
        }

        let mut header = &mmap[..HEADER_SIZE];
        let mut magic = [0u8; 4];
        header.copy_to_slice(&mut magic);
        if magic != VAMANA_MAGIC {
            return Err(VamanaError::Corrupt(format!("bad graph magic: {:02x?}", magic)));
        }
        let version = header.get_u32_le();
        if version != VAMANA_VERSION {
            return Err(VamanaError::Corrupt(format!(
                "unsupported graph version: {}",
                version
            )));
        }
        let n = header.get_u64_le() as usize;
        let r = header.get_u32_le() as usize;
        let entry_point = header.get_u32_le();

        if n == 0 {
            return Err(VamanaError::Corrupt("graph file holds no nodes".into()));
        }
        if entry_point as usize >= n {
            return Err(VamanaError::Corrupt(format!(
                "entry point {} out of range ({} nodes)",
                entry_point, n
            )));
        }
        let expected = HEADER_SIZE + n * r * 4 + 4;
        if mmap.len() != expected {
            return Err(VamanaError::Corrupt(format!(
                "graph file holds {} bytes, expected {}",
                mmap.len(),
                expected
            )));
        }

        Ok(Self {
            mmap,
            n,
            r,
            entry_point,
        })
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn r(&self) -> u32 {
        self.r as u32
    }

    pub fn entry_point(&self) -> NodeId {
        self.entry_point
    }

    /// Neighbors of `node`, in stored (distance) order.
    pub fn neighbors(&self, node: NodeId) -> Result<Vec<NodeId>> {
        if node as usize >= self.n {
            return Err(VamanaError::Corrupt(format!("node {} out of range", node)));
        }
        let start = HEADER_SIZE + node as usize * self.r * 4;

        let mut out = Vec::with_capacity(self.r);
        for i in 0..self.r {
            let at = start + i * 4;
            let nb = u32::from_le_bytes(
                self.mmap[at..at + 4].try_into().expect("4-byte slice"),
            );
            if nb == EMPTY_SLOT {
                break;
            }
            out.push(nb);
        }
        Ok(out)
    }

    /// Deep validation: trailing CRC plus edge invariants.
    pub fn verify(&self) -> Result<()> {
        let body = &self.mmap[..self.mmap.len() - 4];
        let expected = u32::from_le_bytes(
            self.mmap[self.mmap.len() - 4..].try_into().expect("4-byte slice"),
        );
        let actual = crc32c::crc32c(body);
        if expected != actual {
            return Err(VamanaError::Corrupt(format!(
                "graph CRC mismatch: expected {:#x}, got {:#x}",
                expected, actual
            )));
        }

        for node in 0..self.n as NodeId {
            let mut seen = std::collections::HashSet::new();
            for nb in self.neighbors(node)? {
                if nb as usize >= self.n {
                    return Err(VamanaError::Corrupt(format!(
                        "node {} edge to {} out of range",
                        node, nb
                    )));
                }
                if nb == node {
                    return Err(VamanaError::Corrupt(format!("node {} self-loop", node)));
                }
                if !seen.insert(nb) {
                    return Err(VamanaError::Corrupt(format!(
                        "node {} duplicate edge to {}",
                        node, nb
                    )));
                }
            }
        }
        Ok(())
    }

    /// Touch every mapped page; returns bytes walked. Used by warmup.
    pub fn prefault(&self) -> u64 {
        let mut acc = 0u64;
        for chunk in self.mmap.chunks(4096) {
            acc = acc.wrapping_add(chunk[0] as u64);
        }
        std::hint::black_box(acc);
        self.mmap.len() as u64
    }
}
