//! Vector primitives for kombu.
//!
//! This crate provides the pieces shared by every graph backend:
//!
//! - **Distance metrics**: Cosine and squared L2
//! - **`VectorSource` trait**: the candidate expander through which a backend
//!   obtains embeddings during search
//! - **Brute-force scan**: exact top-k over an explicit candidate set
//!
//! # Architecture
//!
//! Backends never hold embeddings themselves. During search they ask a
//! [`VectorSource`] for the vectors of the nodes they want to visit:
//!
//! ```text
//! Backend beam search ──fetch(nodes)──► VectorSource
//!                                         ├── blob source (mmap reads)
//!                                         └── recompute source (text → provider)
//! ```
//!
//! A source is free to omit nodes from its answer (filtered out, or a failed
//! embedding batch); the backend treats omitted nodes as visited-but-dead.

mod brute;
mod distance;
mod traits;

pub use brute::brute_force_top_k;
pub use distance::{cosine_distance, squared_l2_distance, Metric};
pub use traits::{
    FetchBatch, Interrupt, Neighbor, NodeId, SearchOutcome, SliceSource, VectorSource,
};

/// Error type for vector operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    #[error("Vector source failed: {0}")]
    Source(String),

    #[error("Search cancelled")]
    Cancelled,

    #[error("Search deadline exceeded")]
    DeadlineExceeded,
}

/// Result type for vector operations.
pub type Result<T> = std::result::Result<T, VectorError>;

/// Validate a vector's dimension and values.
pub fn validate_vector(vector: &[f32], dimension: usize) -> Result<()> {
    if vector.len() != dimension {
        return Err(VectorError::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
        });
    }
    for (i, &v) in vector.iter().enumerate() {
        if v.is_nan() {
            return Err(VectorError::InvalidVector(format!("NaN at index {}", i)));
        }
        if v.is_infinite() {
            return Err(VectorError::InvalidVector(format!("Inf at index {}", i)));
        }
    }
    Ok(())
}
