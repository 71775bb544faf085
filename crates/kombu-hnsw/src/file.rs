//! Graph file format.
//!
//! Layout (little-endian):
//! ```text
//! magic(4) = "LHN1" | version(u32) | N(u64) | M(u32) | num_layers(u32)
//! | entry_point(u32) | layer_of_node[N](u8)
//! | per-layer offset tables (u64 each, see below)
//! | adjacency lists: degree(u32) | neighbors(u32)[degree]
//! | crc32c(u32) over everything preceding it
//! ```
//!
//! The nodes present at layer `l` are exactly those with
//! `layer_of_node[n] >= l`, so each layer's offset-table length is derivable
//! from the header. Layer `l`'s table holds one u64 per present node in
//! ascending node order, pointing into the adjacency region.
//!
//! Opening is cheap (header checks and bounds only); [`HnswFile::verify`]
//! walks the whole file, checks the trailing CRC and every edge invariant.

use crate::graph::HnswGraph;
use crate::{HnswError, Result};
use bytes::{Buf, BufMut, BytesMut};
use kombu_vector::NodeId;
use memmap2::Mmap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Graph file magic, "LHN1".
pub const GRAPH_MAGIC: [u8; 4] = *b"LHN1";

/// Current graph file format version.
pub const GRAPH_VERSION: u32 = 1;

const HEADER_SIZE: usize = 28;

/// Serialize a graph to `path`, atomically (temp + rename).
///
/// Output bytes are a pure function of the graph, so identical graphs
/// persist to identical files.
pub fn write_graph(graph: &HnswGraph, path: impl AsRef<Path>) -> Result<()> {
    let n = graph.len();
    let num_layers = graph.num_layers();

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + n * 16);
    buf.put_slice(&GRAPH_MAGIC);
    buf.put_u32_le(GRAPH_VERSION);
    buf.put_u64_le(n as u64);
    buf.put_u32_le(graph.m);
    buf.put_u32_le(num_layers as u32);
    buf.put_u32_le(graph.entry_point);

    for &level in &graph.levels {
        buf.put_u8(level);
    }

    // Adjacency region laid out layer-major, node-ascending; the offset
    // tables are written first, so lay out the region in a scratch buffer.
    let mut adjacency = BytesMut::new();
    let mut offsets: Vec<u64> = Vec::new();
    for layer in 0..num_layers {
        for node in 0..n as NodeId {
            if usize::from(graph.levels[node as usize]) < layer {
                continue;
            }
            offsets.push(adjacency.len() as u64);
            let list = graph.neighbors(node, layer);
            adjacency.put_u32_le(list.len() as u32);
            for &nb in list {
                adjacency.put_u32_le(nb);
            }
        }
    }

    for off in offsets {
        buf.put_u64_le(off);
    }
    buf.extend_from_slice(&adjacency);

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

    tracing::debug!(
        nodes = n,
        layers = num_layers,
        bytes = buf.len(),
        "hnsw graph written"
    );
    Ok(())
}

/// Read-only, memory-mapped view of a graph file.
pub struct HnswFile {
    mmap: Mmap,
    n: usize,
    m: u32,
    num_layers: usize,
    entry_point: NodeId,
    /// Byte offset of `layer_of_node`.
    levels_at: usize,
    /// Byte offset of the offset tables.
    tables_at: usize,
    /// Byte offset of the adjacency region.
    adjacency_at: usize,
    /// Index (in u64s) where each layer's offset table starts.
    table_starts: Vec<usize>,
    /// For each layer above 0, the present nodes in ascending order.
    upper_nodes: Vec<Vec<NodeId>>,
}

impl HnswFile {
    /// Open and bounds-check a graph file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        // Safety: the index directory owns the file and builders replace it
        // atomically; it is never truncated while mapped.
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < HEADER_SIZE + 4 {
            return Err(HnswError::Corrupt(format!(
                "graph file truncated: {} bytes",
                mmap.len()
            )));
        }

        let mut header = &mmap[..HEADER_SIZE];
        let mut magic = [0u8; 4];
        header.copy_to_slice(&mut magic);
        if magic != GRAPH_MAGIC {
            return Err(HnswError::Corrupt(format!("bad graph magic: {:02x?}", magic)));
        }
        let version = header.get_u32_le();
        if version != GRAPH_VERSION {
            return Err(HnswError::Corrupt(format!("unsupported graph version: {}", version)));
        }
        let n = header.get_u64_le() as usize;
        let m = header.get_u32_le();
        let num_layers = header.get_u32_le() as usize;
        let entry_point = header.get_u32_le();

        if n == 0 || num_layers == 0 {
            return Err(HnswError::Corrupt("graph file holds no nodes".into()));
        }
        if entry_point as usize >= n {
            return Err(HnswError::Corrupt(format!(
                "entry point {} out of range ({} nodes)",
                entry_point, n
            )));
        }

        let levels_at = HEADER_SIZE;
        let tables_at = levels_at + n;
        if mmap.len() < tables_at {
            return Err(HnswError::Corrupt("graph file truncated in layer table".into()));
        }

        let levels = &mmap[levels_at..tables_at];
        let top = num_layers - 1;
        if levels.iter().any(|&l| usize::from(l) > top) {
            return Err(HnswError::Corrupt("node layer exceeds num_layers".into()));
        }
        if usize::from(levels[entry_point as usize]) != top {
            return Err(HnswError::Corrupt("entry point is not at the top layer".into()));
        }

        let mut upper_nodes: Vec<Vec<NodeId>> = vec![Vec::new(); top];
        for (node, &level) in levels.iter().enumerate() {
            for layer in 1..=usize::from(level) {
                upper_nodes[layer - 1].push(node as NodeId);
            }
        }

        let mut table_starts = Vec::with_capacity(num_layers);
        let mut total = 0usize;
        for layer in 0..num_layers {
            table_starts.push(total);
            total += if layer == 0 { n } else { upper_nodes[layer - 1].len() };
        }

        let adjacency_at = tables_at + total * 8;
        if mmap.len() < adjacency_at + 4 {
            return Err(HnswError::Corrupt("graph file truncated in offset tables".into()));
        }

        Ok(Self {
            mmap,
            n,
            m,
            num_layers,
            entry_point,
            levels_at,
            tables_at,
            adjacency_at,
            table_starts,
            upper_nodes,
        })
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn m(&self) -> u32 {
        self.m
    }

    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    pub fn entry_point(&self) -> NodeId {
        self.entry_point
    }

    /// Highest layer of a node.
    pub fn layer_of(&self, node: NodeId) -> u8 {
        self.mmap[self.levels_at + node as usize]
    }

    /// Neighbors of `node` at `layer`; empty when the node is below the
    /// layer.
    pub fn neighbors(&self, node: NodeId, layer: usize) -> Result<Vec<NodeId>> {
        if node as usize >= self.n {
            return Err(HnswError::Corrupt(format!("node {} out of range", node)));
        }
        if layer >= self.num_layers || usize::from(self.layer_of(node)) < layer {
            return Ok(Vec::new());
        }

        let pos = if layer == 0 {
            node as usize
        } else {
            match self.upper_nodes[layer - 1].binary_search(&node) {
                Ok(p) => p,
                Err(_) => return Ok(Vec::new()),
            }
        };

        let table_index = self.table_starts[layer] + pos;
        let rel = self.read_u64(self.tables_at + table_index * 8)? as usize;
        let at = self.adjacency_at + rel;

        let degree = self.read_u32(at)? as usize;
        let end = at + 4 + degree * 4;
        if end > self.mmap.len().saturating_sub(4) {
            return Err(HnswError::Corrupt(format!(
                "adjacency of node {} layer {} runs past file end",
                node, layer
            )));
        }

        let mut out = Vec::with_capacity(degree);
        for i in 0..degree {
            out.push(u32::from_le_bytes(
                self.mmap[at + 4 + i * 4..at + 8 + i * 4].try_into().expect("4-byte slice"),
            ));
        }
        Ok(out)
    }

    /// Deep validation: trailing CRC plus every edge invariant (in-range,
    /// no self-loops, no duplicates, degree bounds, layer containment).
    pub fn verify(&self) -> Result<()> {
        let body = &self.mmap[..self.mmap.len() - 4];
        let expected = u32::from_le_bytes(
            self.mmap[self.mmap.len() - 4..].try_into().expect("4-byte slice"),
        );
        let actual = crc32c::crc32c(body);
        if expected != actual {
            return Err(HnswError::Corrupt(format!(
                "graph CRC mismatch: expected {:#x}, got {:#x}",
                expected, actual
            )));
        }

        for node in 0..self.n as NodeId {
            let level = usize::from(self.layer_of(node));
            for layer in 0..=level {
                let bound = if layer == 0 { self.m as usize * 2 } else { self.m as usize };
                let list = self.neighbors(node, layer)?;
                if list.len() > bound {
                    return Err(HnswError::Corrupt(format!(
                        "node {} layer {} degree {} exceeds bound {}",
                        node,
                        layer,
                        list.len(),
                        bound
                    )));
                }
                let mut seen = std::collections::HashSet::new();
                for &nb in &list {
                    if nb as usize >= self.n {
                        return Err(HnswError::Corrupt(format!(
                            "node {} layer {} edge to {} out of range",
                            node, layer, nb
                        )));
                    }
                    if nb == node {
                        return Err(HnswError::Corrupt(format!(
                            "node {} layer {} self-loop",
                            node, layer
                        )));
                    }
                    if usize::from(self.layer_of(nb)) < layer {
                        return Err(HnswError::Corrupt(format!(
                            "node {} layer {} edge to {} below the layer",
                            node, layer, nb
                        )));
                    }
                    if !seen.insert(nb) {
                        return Err(HnswError::Corrupt(format!(
                            "node {} layer {} duplicate edge to {}",
                            node, layer, nb
                        )));
                    }
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

    fn read_u32(&self, at: usize) -> Result<u32> {
        self.mmap
            .get(at..at + 4)
            .map(|b| u32::from_le_bytes(b.try_into().expect("4-byte slice")))
            .ok_or_else(|| HnswError::Corrupt(format!("read past end at {}", at)))
    }

    fn read_u64(&self, at: usize) -> Result<u64> {
        self.mmap
            .get(at..at + 8)
            .map(|b| u64::from_le_bytes(b.try_into().expect("8-byte slice")))
            .ok_or_else(|| HnswError::Corrupt(format!("read past end at {}", at)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::build_graph;
    use crate::HnswParams;
    use kombu_vector::{Metric, SliceSource};
    use tempfile::tempdir;

    fn sample_graph() -> HnswGraph {
        let data: Vec<f32> = (0..120).flat_map(|i| [i as f32, 0.0]).collect();
        let source = SliceSource::new(&data, 2);
        let params = HnswParams {
            m: 4,
            ef_construction: 32,
            max_layers: 8,
            seed: 7,
            metric: Metric::L2,
        };
        build_graph(&source, &params, &mut |_, _| {}).unwrap()
    }

    #[test]
    fn test_file_roundtrip() {
        let graph = sample_graph();
        let dir = tempdir().unwrap();
        let path = dir.path().join("g.graph");
        write_graph(&graph, &path).unwrap();

        let file = HnswFile::open(&path).unwrap();
        assert_eq!(file.len(), graph.len());
        assert_eq!(file.m(), graph.m);
        assert_eq!(file.num_layers(), graph.num_layers());
        assert_eq!(file.entry_point(), graph.entry_point);

        for node in 0..graph.len() as NodeId {
            assert_eq!(file.layer_of(node), graph.levels[node as usize]);
            for layer in 0..=usize::from(graph.levels[node as usize]) {
                assert_eq!(
                    file.neighbors(node, layer).unwrap(),
                    graph.neighbors(node, layer),
                    "node {} layer {}",
                    node,
                    layer
                );
            }
        }

        file.verify().unwrap();
    }

    #[test]
    fn test_identical_graphs_identical_bytes() {
        let graph = sample_graph();
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.graph");
        let b = dir.path().join("b.graph");
        write_graph(&graph, &a).unwrap();
        write_graph(&graph, &b).unwrap();
        assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
    }

    #[test]
    fn test_corrupt_magic_refused() {
        let graph = sample_graph();
        let dir = tempdir().unwrap();
        let path = dir.path().join("g.graph");
        write_graph(&graph, &path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] = b'X';
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(HnswFile::open(&path), Err(HnswError::Corrupt(_))));
    }

    #[test]
    fn test_flipped_byte_caught_by_verify() {
        let graph = sample_graph();
        let dir = tempdir().unwrap();
        let path = dir.path().join("g.graph");
        write_graph(&graph, &path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        // Open may or may not notice depending on which byte flipped; the
        // deep check must.
        if let Ok(file) = HnswFile::open(&path) {
            assert!(file.verify().is_err());
        }
    }

    #[test]
    fn test_truncated_refused() {
        let graph = sample_graph();
        let dir = tempdir().unwrap();
        let path = dir.path().join("g.graph");
        write_graph(&graph, &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..20]).unwrap();
        assert!(matches!(HnswFile::open(&path), Err(HnswError::Corrupt(_))));
    }
}
