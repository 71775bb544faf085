//! Passage store for kombu.
//!
//! Persists the text and metadata behind every graph node and serves O(1)
//! lookups by node index. Two files per index:
//!
//! - `<name>.passages.jsonl`: one JSON object per line, append-only during
//!   build
//! - `<name>.passages.idx`: a fixed-width table of byte offsets into the
//!   jsonl, with a trailing sentinel equal to the jsonl size so record `i`
//!   spans `[off[i], off[i+1])`
//!
//! Readers open both files memory-mapped and never mutate them. A store
//! whose sentinel disagrees with the jsonl size refuses to open.

mod offsets;
mod store;
mod writer;

pub use offsets::{OffsetTable, OFFSETS_MAGIC, OFFSETS_VERSION};
pub use store::PassageStore;
pub use writer::PassageWriter;

use serde::{Deserialize, Serialize};

/// The atom of retrieval: id + text + free-form metadata.
///
/// Immutable once written. `metadata` values are strings, numbers, or bools;
/// an optional ISO-8601 `timestamp` key drives time filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Passage {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(
        mut self,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Error type for passage store operations.
#[derive(Debug, thiserror::Error)]
pub enum PassageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Duplicate passage id: {0}")]
    DuplicateId(String),

    #[error("Node {node} out of range (store holds {len})")]
    OutOfRange { node: u32, len: usize },

    #[error("Passage store corrupt: {0}")]
    Corrupt(String),
}

/// Result type for passage store operations.
pub type Result<T> = std::result::Result<T, PassageError>;
