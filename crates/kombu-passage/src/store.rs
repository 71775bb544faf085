//! Read-side of the passage store.

use crate::offsets::OffsetTable;
use crate::{Passage, PassageError, Result};
use memmap2::Mmap;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

/// Shared read-only view over a finished passage store.
///
/// Both files are memory-mapped. Open cost is one scan of the jsonl to build
/// the id map and retain per-node metadata (filters evaluate against it
/// without touching disk); lookups after that are O(1) slices into the map.
pub struct PassageStore {
    jsonl: Mmap,
    table: OffsetTable,
    ids: Vec<String>,
    id_to_node: HashMap<String, u32>,
    metadata: Vec<serde_json::Map<String, serde_json::Value>>,
}

impl PassageStore {
    /// Open a store, refusing one that violates its format invariants:
    /// monotone offsets and a sentinel equal to the jsonl byte size.
    pub fn open(jsonl_path: impl AsRef<Path>, idx_path: impl AsRef<Path>) -> Result<Self> {
        let idx_bytes = std::fs::read(idx_path.as_ref())?;
        let table = OffsetTable::decode(&idx_bytes)?;

        let jsonl_file = File::open(jsonl_path.as_ref())?;
        let jsonl_size = jsonl_file.metadata()?.len();
        if table.sentinel() != jsonl_size {
            return Err(PassageError::Corrupt(format!(
                "offset sentinel {} disagrees with jsonl size {}",
                table.sentinel(),
                jsonl_size
            )));
        }

        // Safety: the index directory owns these files and writers finished
        // before any reader opens them; the file is never truncated while
        // mapped.
        let jsonl = unsafe { Mmap::map(&jsonl_file)? };

        let n = table.len();
        let mut ids = Vec::with_capacity(n);
        let mut id_to_node = HashMap::with_capacity(n);
        let mut metadata = Vec::with_capacity(n);

        for node in 0..n as u32 {
            let passage = parse_record(&jsonl, &table, node)?;
            if id_to_node.insert(passage.id.clone(), node).is_some() {
                return Err(PassageError::Corrupt(format!(
                    "duplicate id {:?} at node {}",
                    passage.id, node
                )));
            }
            ids.push(passage.id);
            metadata.push(passage.metadata);
        }

        tracing::debug!(passages = n, "passage store opened");

        Ok(Self {
            jsonl,
            table,
            ids,
            id_to_node,
            metadata,
        })
    }

    /// Number of passages.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }

    /// Passage at node index `n`.
    pub fn get_by_node(&self, n: u32) -> Result<Passage> {
        parse_record(&self.jsonl, &self.table, n)
    }

    /// Passage by id, via the in-memory id map.
    pub fn get_by_id(&self, id: &str) -> Result<Passage> {
        let &node = self
            .id_to_node
            .get(id)
            .ok_or_else(|| PassageError::Corrupt(format!("unknown passage id {:?}", id)))?;
        self.get_by_node(node)
    }

    /// Node index of an id, if present.
    pub fn node_of(&self, id: &str) -> Option<u32> {
        self.id_to_node.get(id).copied()
    }

    /// Id of a node index.
    pub fn id_of(&self, n: u32) -> Option<&str> {
        self.ids.get(n as usize).map(String::as_str)
    }

    /// All ids in node order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Metadata of node `n`, held in memory since open.
    pub fn metadata_of(&self, n: u32) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.metadata.get(n as usize)
    }

    /// Sequential scan in node order.
    pub fn iter(&self) -> impl Iterator<Item = Result<Passage>> + '_ {
        (0..self.len() as u32).map(move |n| self.get_by_node(n))
    }

    /// Touch every mapped page; returns bytes walked. Used by warmup.
    pub fn prefault(&self) -> u64 {
        let mut acc = 0u64;
        for chunk in self.jsonl.chunks(4096) {
            acc = acc.wrapping_add(chunk[0] as u64);
        }
        std::hint::black_box(acc);
        self.jsonl.len() as u64
    }
}

fn parse_record(jsonl: &[u8], table: &OffsetTable, n: u32) -> Result<Passage> {
    let (start, end) = table.span(n)?;
    let raw = jsonl
        .get(start as usize..end as usize)
        .ok_or_else(|| PassageError::Corrupt(format!("record {} spans past jsonl end", n)))?;
    serde_json::from_slice(raw)
        .map_err(|e| PassageError::Corrupt(format!("record {} does not parse: {}", n, e)))
}
