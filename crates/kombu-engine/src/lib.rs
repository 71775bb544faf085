//! The kombu retrieval engine.
//!
//! kombu is a vector retrieval system whose index stores graph topology and
//! passage text, not embeddings: at search time embeddings are either read
//! from an optional blob or recomputed from the text through a
//! caller-supplied [`EmbeddingProvider`]. The graph is a few percent of a
//! conventional index's footprint; the provider pays for it at query time.
//!
//! This crate ties the workspace together:
//!
//! - [`build`] ingests documents, embeds them through a worker pool, and
//!   writes an index directory (graph file, passage store, manifest,
//!   optional embedding blob) atomically
//! - [`Searcher`] answers queries: graph beam search with metadata/time
//!   filters, brute-force fallback for selective filters, optional BM25
//!   hybrid rescoring, and date post-sorting
//! - [`EngineError`] is the flat error taxonomy with CLI exit-code mapping
//!
//! # Example
//!
//! ```ignore
//! use kombu_engine::{build, BuildParams, Document, Searcher, SearcherConfig, SearchOptions};
//!
//! let params = BuildParams::default();
//! build(&dir, &params, documents, provider.as_ref(), |_, _, _| {})?;
//!
//! let searcher = Searcher::open(&dir, &params.name, provider, SearcherConfig::default())?;
//! let response = searcher.search("the cat on the mat", 5, &SearchOptions::default())?;
//! for hit in response.results {
//!     println!("{:.3}  {}", hit.score, hit.passage.text);
//! }
//! ```

mod backend;
mod builder;
mod cache;
mod error;
mod expander;
mod filter;
mod lock;
mod meta;
mod provider;
mod searcher;

pub use backend::GraphBackend;
pub use builder::{
    build, BuildParams, BuildPhase, BuildReport, Document, DuplicatePolicy,
};
pub use cache::VectorCache;
pub use error::{EngineError, Result};
pub use expander::{BlobSource, CancelToken, EmbeddingBlob, RecomputeSource, SearchLimits};
pub use filter::{parse_timestamp, FilterSet, SearchFilters};
pub use meta::{
    BackendKind, FilesMeta, HnswMeta, IndexPaths, Manifest, VamanaMeta, MANIFEST_VERSION,
};
pub use provider::{EmbeddingProvider, EncodeKind, ProviderError, RetryPolicy};
pub use searcher::{
    Index, SearchOptions, SearchResponse, SearchResult, SearchRoute, Searcher, SearcherConfig,
    SortBy,
};

// Re-exported so engine callers configure backends without importing the
// backend crates directly.
pub use kombu_hnsw::HnswParams;
pub use kombu_lexical::{Bm25Params, TOKENIZER_ID};
pub use kombu_passage::Passage;
pub use kombu_vamana::VamanaParams;
pub use kombu_vector::Metric;
