//! Backend dispatch.
//!
//! The backend is chosen at build time and recorded in the manifest; it
//! never changes for the life of an index, so a tagged enum (not trait
//! objects) carries the two graph implementations.

use crate::meta::{BackendKind, Manifest};
use crate::Result;
use kombu_hnsw::HnswFile;
use kombu_vamana::VamanaFile;
use kombu_vector::{Metric, NodeId, SearchOutcome, VectorSource};
use std::path::Path;

/// An opened graph file of either kind.
pub enum GraphBackend {
    Hnsw(HnswFile),
    Vamana(VamanaFile),
}

impl GraphBackend {
    /// Open the graph file named by the manifest.
    pub fn open(manifest: &Manifest, graph_path: impl AsRef<Path>) -> Result<Self> {
        Ok(match manifest.backend {
            BackendKind::Hnsw => Self::Hnsw(HnswFile::open(graph_path)?),
            BackendKind::Vamana => Self::Vamana(VamanaFile::open(graph_path)?),
        })
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Hnsw(f) => f.len(),
            Self::Vamana(f) => f.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entry_point(&self) -> NodeId {
        match self {
            Self::Hnsw(f) => f.entry_point(),
            Self::Vamana(f) => f.entry_point(),
        }
    }

    /// Beam search; `beam` is `ef_search` for HNSW, `L` for Vamana.
    pub fn search(
        &self,
        source: &mut dyn VectorSource,
        query: &[f32],
        metric: Metric,
        k: usize,
        beam: usize,
    ) -> Result<SearchOutcome> {
        Ok(match self {
            Self::Hnsw(f) => kombu_hnsw::search(f, source, query, metric, k, beam)?,
            Self::Vamana(f) => kombu_vamana::search(f, source, query, metric, k, beam)?,
        })
    }

    /// Deep file validation (CRC + edge invariants).
    pub fn verify(&self) -> Result<()> {
        match self {
            Self::Hnsw(f) => f.verify()?,
            Self::Vamana(f) => f.verify()?,
        }
        Ok(())
    }

    /// Touch every mapped page; returns bytes walked.
    pub fn prefault(&self) -> u64 {
        match self {
            Self::Hnsw(f) => f.prefault(),
            Self::Vamana(f) => f.prefault(),
        }
    }
}
