//! BM25 lexical sidecar.
//!
//! Built lazily from the passage store on the first hybrid query and
//! persisted next to the index as `<name>.bm25`. Scores are Okapi BM25 with
//! the usual `k1`/`b` parameters; the tokenizer is fixed per index and its
//! identifier recorded in the manifest, so queries tokenize the same way
//! across rebuilds.

mod index;
mod tokenizer;

pub use index::{Bm25Index, BM25_MAGIC, BM25_VERSION};
pub use tokenizer::{tokenize, TOKENIZER_ID};

/// Okapi BM25 parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// Error type for lexical operations.
#[derive(Debug, thiserror::Error)]
pub enum LexicalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lexical sidecar corrupt: {0}")]
    Corrupt(String),
}

/// Result type for lexical operations.
pub type Result<T> = std::result::Result<T, LexicalError>;
