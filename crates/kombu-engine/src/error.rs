//! Engine error taxonomy.
//!
//! One flat enum so every failure carries a machine-readable kind; leaf
//! crate errors are folded into it at the boundary rather than wrapped, so
//! callers (and the CLI exit-code mapping) never pattern-match through
//! layers.

use kombu_hnsw::HnswError;
use kombu_lexical::LexicalError;
use kombu_passage::PassageError;
use kombu_vamana::VamanaError;
use kombu_vector::VectorError;

/// Error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Duplicate passage id: {0}")]
    DuplicateId(String),

    #[error("Model mismatch: index built with {expected:?}, provider is {actual:?}")]
    ModelMismatch { expected: String, actual: String },

    #[error("Index corrupt: {0}")]
    Corrupt(String),

    #[error("Embedding provider unavailable after retries: {0}")]
    ProviderTransient(String),

    #[error("Embedding provider failed permanently: {0}")]
    ProviderPermanent(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Search deadline exceeded")]
    DeadlineExceeded,

    #[error("Search cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Process exit code for CLI front ends.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidInput(_) | Self::DuplicateId(_) | Self::Io(_) | Self::OutOfMemory(_) => 1,
            Self::ModelMismatch { .. } => 2,
            Self::Corrupt(_) => 3,
            Self::ProviderTransient(_) | Self::ProviderPermanent(_) => 4,
            Self::DeadlineExceeded => 5,
            Self::Cancelled => 6,
        }
    }
}

impl From<PassageError> for EngineError {
    fn from(err: PassageError) -> Self {
        match err {
            PassageError::Io(e) => Self::Io(e),
            PassageError::DuplicateId(id) => Self::DuplicateId(id),
            PassageError::OutOfRange { .. } => Self::Corrupt(err.to_string()),
            PassageError::Corrupt(msg) => Self::Corrupt(msg),
        }
    }
}

impl From<HnswError> for EngineError {
    fn from(err: HnswError) -> Self {
        match err {
            HnswError::Io(e) => Self::Io(e),
            HnswError::Build(msg) => Self::InvalidInput(msg),
            HnswError::Corrupt(msg) => Self::Corrupt(msg),
            HnswError::Vector(e) => e.into(),
        }
    }
}

impl From<VamanaError> for EngineError {
    fn from(err: VamanaError) -> Self {
        match err {
            VamanaError::Io(e) => Self::Io(e),
            VamanaError::Build(msg) => Self::InvalidInput(msg),
            VamanaError::Corrupt(msg) => Self::Corrupt(msg),
            VamanaError::Vector(e) => e.into(),
        }
    }
}

impl From<VectorError> for EngineError {
    fn from(err: VectorError) -> Self {
        match err {
            VectorError::Cancelled => Self::Cancelled,
            VectorError::DeadlineExceeded => Self::DeadlineExceeded,
            VectorError::Source(msg) => Self::ProviderPermanent(msg),
            other => Self::InvalidInput(other.to_string()),
        }
    }
}

impl From<LexicalError> for EngineError {
    fn from(err: LexicalError) -> Self {
        match err {
            LexicalError::Io(e) => Self::Io(e),
            LexicalError::Corrupt(msg) => Self::Corrupt(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(EngineError::InvalidInput("x".into()).exit_code(), 1);
        assert_eq!(
            EngineError::ModelMismatch {
                expected: "a".into(),
                actual: "b".into()
            }
            .exit_code(),
            2
        );
        assert_eq!(EngineError::Corrupt("x".into()).exit_code(), 3);
        assert_eq!(EngineError::ProviderTransient("x".into()).exit_code(), 4);
        assert_eq!(EngineError::DeadlineExceeded.exit_code(), 5);
        assert_eq!(EngineError::Cancelled.exit_code(), 6);
    }

    #[test]
    fn test_passage_error_mapping() {
        let err: EngineError = PassageError::DuplicateId("p1".into()).into();
        assert!(matches!(err, EngineError::DuplicateId(_)));

        let err: EngineError = PassageError::Corrupt("bad".into()).into();
        assert!(matches!(err, EngineError::Corrupt(_)));
    }
}
