//! Vamana (DiskANN-style) graph backend for kombu.
//!
//! A single-layer proximity graph with fixed out-degree `R`, built by the
//! Vamana algorithm: random initialization followed by robust-prune passes.
//! Like the HNSW backend, the persisted graph holds topology only; search
//! pulls embeddings through a [`kombu_vector::VectorSource`].
//!
//! Where HNSW spends memory on a layer hierarchy, Vamana spends build time
//! on pruning passes and starts every search from a single medoid entry
//! point. The fixed-slot adjacency layout makes a node's neighborhood one
//! aligned read, which suits memory-mapped access.

mod builder;
mod file;
mod search;

pub use builder::{build_graph, VamanaGraph};
pub use file::{write_graph, VamanaFile, VAMANA_MAGIC, VAMANA_VERSION};
pub use search::search;

use kombu_vector::Metric;
use serde::{Deserialize, Serialize};

/// Vamana construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VamanaParams {
    /// Maximum out-degree (R).
    pub r: usize,

    /// Search list size during construction (L).
    pub l_build: usize,

    /// Pruning slack: an edge to `c` survives while
    /// `d(node, c) < alpha * d(c, kept)`. Larger keeps longer edges.
    pub alpha: f32,

    /// Number of build passes; the first runs with `alpha = 1.0`.
    pub num_passes: usize,

    /// Seed for the random initial graph.
    pub seed: u64,

    /// Distance metric.
    pub metric: Metric,
}

impl Default for VamanaParams {
    fn default() -> Self {
        Self {
            r: 32,
            l_build: 100,
            alpha: 1.2,
            num_passes: 2,
            seed: 0x76616d61,
            metric: Metric::Cosine,
        }
    }
}

/// Error type for Vamana operations.
#[derive(Debug, thiserror::Error)]
pub enum VamanaError {
    #[error("Vector error: {0}")]
    Vector(#[from] kombu_vector::VectorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid build input: {0}")]
    Build(String),

    #[error("Graph file corrupt: {0}")]
    Corrupt(String),
}

/// Result type for Vamana operations.
pub type Result<T> = std::result::Result<T, VamanaError>;
