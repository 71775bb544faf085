//! HNSW (Hierarchical Navigable Small World) backend for kombu.
//!
//! Unlike a conventional HNSW library, this crate never owns embeddings at
//! search time. The graph file holds topology only; the beam search pulls
//! vectors through a [`kombu_vector::VectorSource`], which the engine backs
//! either with the on-disk embedding blob or with on-the-fly recomputation
//! from passage text.
//!
//! ```text
//! build:   embeddings (resident) ──► construction ──► compact? ──► prune? ──► .graph
//! search:  .graph (mmap) + VectorSource ──► beam search ──► top-k neighbors
//! ```
//!
//! # Parameters
//!
//! - `M`: max out-degree per node per layer (`2M` at layer 0). Default: 16
//! - `ef_construction`: beam width during build. Default: 200
//! - `ef_search`: beam width during search. Default: 64
//! - `seed`: layer-draw seed; fixed seed + fixed insert order means
//!   byte-identical graph files across rebuilds

mod build;
mod compact;
mod file;
mod graph;
mod layer;
mod prune;
mod search;

pub use build::build_graph;
pub use compact::compact;
pub use file::{write_graph, HnswFile, GRAPH_MAGIC, GRAPH_VERSION};
pub use graph::HnswGraph;
pub use layer::LevelGenerator;
pub use prune::prune_edges;
pub use search::search;

use kombu_vector::Metric;
use serde::{Deserialize, Serialize};

/// HNSW construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswParams {
    /// Max connections per node per layer; layer 0 allows `2 * m`.
    pub m: usize,

    /// Beam width during construction. Higher = better graph, slower build.
    pub ef_construction: usize,

    /// Maximum number of layers.
    pub max_layers: usize,

    /// Seed for the geometric layer draw. Recorded in the manifest so a
    /// rebuild reproduces the same file bytes.
    pub seed: u64,

    /// Distance metric.
    pub metric: Metric,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            max_layers: 16,
            seed: 0x6b6f6d62,
            metric: Metric::Cosine,
        }
    }
}

/// Error type for HNSW operations.
#[derive(Debug, thiserror::Error)]
pub enum HnswError {
    #[error("Vector error: {0}")]
    Vector(#[from] kombu_vector::VectorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid build input: {0}")]
    Build(String),

    #[error("Graph file corrupt: {0}")]
    Corrupt(String),
}

/// Result type for HNSW operations.
pub type Result<T> = std::result::Result<T, HnswError>;
