//! Core abstractions shared by the graph backends.
//!
//! [`VectorSource`] is the candidate expander: the searcher hands one to a
//! backend, and the backend pulls embeddings through it instead of reading
//! them itself. This is what lets the same beam search run against a
//! memory-mapped embedding blob or against on-the-fly recomputation.

use crate::Result;

/// Dense node index into the graph, `0..N`.
pub type NodeId = u32;

/// A scored node returned from search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Node index.
    pub node: NodeId,
    /// Distance to the query (lower = more similar).
    pub distance: f32,
}

impl Neighbor {
    pub fn new(node: NodeId, distance: f32) -> Self {
        Self { node, distance }
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // total_cmp for NaN safety; ties break by ascending node index so
        // identical inputs always produce identical orderings.
        self.distance
            .total_cmp(&other.distance)
            .then(self.node.cmp(&other.node))
    }
}

/// How a graph search ended early, if it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// The source reported cancellation; the beam was discarded.
    Cancelled,
    /// The per-query deadline expired; the beam so far is returned.
    DeadlineExceeded,
}

/// Result of a graph search, shared by every backend.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Top-k neighbors, ascending by distance (ties by node index).
    pub neighbors: Vec<Neighbor>,
    /// Set when the search stopped early.
    pub interrupt: Option<Interrupt>,
    /// Nodes whose embeddings the source never returned (filtered out or
    /// failed batches). Lets the caller distinguish a clean search from a
    /// degraded one.
    pub dropped: usize,
}

/// Embeddings fetched for a batch of nodes.
///
/// `nodes` and `vectors` are parallel: `vectors[i*dim..(i+1)*dim]` is the
/// embedding of `nodes[i]`. Requested nodes absent from `nodes` were dropped
/// by the source (filtered out, or their embedding batch failed) and must not
/// be requested again.
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub nodes: Vec<NodeId>,
    pub vectors: Vec<f32>,
}

impl FetchBatch {
    /// Iterate `(node, embedding)` pairs.
    pub fn iter(&self, dim: usize) -> impl Iterator<Item = (NodeId, &[f32])> {
        self.nodes
            .iter()
            .copied()
            .zip(self.vectors.chunks_exact(dim))
    }
}

/// The candidate expander a backend searches through.
///
/// Implementations may block (recompute sources wait on the embedding
/// provider); `fetch` is the backend's only suspension point, and the only
/// place cancellation and deadlines are observed. A source signals
/// interruption by returning [`crate::VectorError::Cancelled`] or
/// [`crate::VectorError::DeadlineExceeded`], which the backend surfaces in
/// its search outcome rather than treating as failure.
pub trait VectorSource {
    /// Embedding dimensionality. Every fetched vector has this length.
    fn dimension(&self) -> usize;

    /// Fetch embeddings for `nodes`.
    ///
    /// The result may omit nodes; omitted nodes are dead to this search.
    fn fetch(&mut self, nodes: &[NodeId]) -> Result<FetchBatch>;
}

/// A source backed by a resident slice of vectors, node `i` at row `i`.
///
/// Used by the builder (vectors are in memory during construction) and by
/// tests.
pub struct SliceSource<'a> {
    vectors: &'a [f32],
    dimension: usize,
}

impl<'a> SliceSource<'a> {
    /// Wrap a flat `N × dim` buffer.
    ///
    /// # Panics
    ///
    /// Panics if `vectors.len()` is not a multiple of `dim`.
    pub fn new(vectors: &'a [f32], dimension: usize) -> Self {
        assert!(
            dimension > 0 && vectors.len() % dimension == 0,
            "buffer length {} is not a multiple of dimension {}",
            vectors.len(),
            dimension
        );
        Self { vectors, dimension }
    }

    pub fn len(&self) -> usize {
        self.vectors.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Row `node` as a slice.
    pub fn row(&self, node: NodeId) -> &[f32] {
        let start = node as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }
}

impl VectorSource for SliceSource<'_> {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn fetch(&mut self, nodes: &[NodeId]) -> Result<FetchBatch> {
        let mut batch = FetchBatch {
            nodes: Vec::with_capacity(nodes.len()),
            vectors: Vec::with_capacity(nodes.len() * self.dimension),
        };
        for &n in nodes {
            if (n as usize) < self.len() {
                batch.nodes.push(n);
                batch.vectors.extend_from_slice(self.row(n));
            }
        }
        Ok(batch)
    }
}
