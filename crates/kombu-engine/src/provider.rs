//! Embedding provider contract.
//!
//! The engine never loads a model or opens a connection itself; it sees a
//! pure batched function from texts to vectors. Providers declare their
//! model identity and dimensionality, and the engine verifies both against
//! the index manifest at open time.

use crate::{EngineError, Result};
use std::time::Duration;

/// Whether texts are being embedded as corpus documents or as a query.
///
/// Instruction-aware models prepend different prompts for the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeKind {
    Document,
    Query,
}

/// Failure modes a provider may surface.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Worth retrying: timeouts, connection resets, 5xx.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Not worth retrying: bad credentials, unknown model, 4xx.
    #[error("permanent provider failure: {0}")]
    Permanent(String),
}

/// The embedding function the engine is parameterized over.
///
/// `encode` must be deterministic up to floating-point rounding: the same
/// text always produces the same vector, which is what makes recompute mode
/// sound.
pub trait EmbeddingProvider: Send + Sync {
    /// Stable model identifier, recorded in the manifest.
    fn model_id(&self) -> &str;

    /// Embedding dimensionality.
    fn dimension(&self) -> usize;

    /// True when embeddings are unit-norm (cosine reduces to `1 - dot`).
    fn normalized(&self) -> bool {
        false
    }

    /// Embed a batch of texts.
    fn encode(
        &self,
        texts: &[String],
        kind: EncodeKind,
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError>;
}

/// Retry schedule for transient provider failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retry_max: u32,
    /// First backoff; doubles per retry.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_max: 2,
            backoff_base: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Call `encode` with exponential backoff on transient failures, then
    /// validate the output shape.
    ///
    /// Exhausted transient retries surface as [`EngineError::ProviderTransient`];
    /// permanent failures surface immediately.
    pub fn encode_with_retry(
        &self,
        provider: &dyn EmbeddingProvider,
        texts: &[String],
        kind: EncodeKind,
    ) -> Result<Vec<Vec<f32>>> {
        let mut backoff = self.backoff_base;
        let mut attempt = 0u32;
        loop {
            match provider.encode(texts, kind) {
                Ok(vectors) => {
                    validate_encode_output(provider, texts.len(), &vectors)?;
                    return Ok(vectors);
                }
                Err(ProviderError::Permanent(msg)) => {
                    return Err(EngineError::ProviderPermanent(msg));
                }
                Err(ProviderError::Transient(msg)) => {
                    if attempt >= self.retry_max {
                        return Err(EngineError::ProviderTransient(msg));
                    }
                    tracing::debug!(attempt, backoff_ms = backoff.as_millis() as u64, error = %msg,
                        "retrying embedding batch");
                    std::thread::sleep(backoff);
                    backoff *= 2;
                    attempt += 1;
                }
            }
        }
    }
}

fn validate_encode_output(
    provider: &dyn EmbeddingProvider,
    expected: usize,
    vectors: &[Vec<f32>],
) -> Result<()> {
    if vectors.len() != expected {
        return Err(EngineError::ProviderPermanent(format!(
            "provider returned {} vectors for {} texts",
            vectors.len(),
            expected
        )));
    }
    let dim = provider.dimension();
    for (i, v) in vectors.iter().enumerate() {
        if v.len() != dim {
            return Err(EngineError::ProviderPermanent(format!(
                "provider returned {}-dim vector at {} (declared {})",
                v.len(),
                i,
                dim
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyOnce {
        calls: AtomicU32,
    }

    impl EmbeddingProvider for FlakyOnce {
        fn model_id(&self) -> &str {
            "flaky-once"
        }
        fn dimension(&self) -> usize {
            2
        }
        fn encode(
            &self,
            texts: &[String],
            _kind: EncodeKind,
        ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(ProviderError::Transient("connection reset".into()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[test]
    fn test_transient_retried() {
        let provider = FlakyOnce {
            calls: AtomicU32::new(0),
        };
        let policy = RetryPolicy {
            retry_max: 2,
            backoff_base: Duration::from_millis(1),
        };
        let out = policy
            .encode_with_retry(&provider, &["a".into()], EncodeKind::Document)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_transient_exhausted() {
        struct AlwaysDown;
        impl EmbeddingProvider for AlwaysDown {
            fn model_id(&self) -> &str {
                "down"
            }
            fn dimension(&self) -> usize {
                2
            }
            fn encode(
                &self,
                _texts: &[String],
                _kind: EncodeKind,
            ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
                Err(ProviderError::Transient("still down".into()))
            }
        }

        let policy = RetryPolicy {
            retry_max: 1,
            backoff_base: Duration::from_millis(1),
        };
        let err = policy
            .encode_with_retry(&AlwaysDown, &["a".into()], EncodeKind::Query)
            .unwrap_err();
        assert!(matches!(err, EngineError::ProviderTransient(_)));
    }

    #[test]
    fn test_bad_shape_is_permanent() {
        struct WrongDim;
        impl EmbeddingProvider for WrongDim {
            fn model_id(&self) -> &str {
                "wrong"
            }
            fn dimension(&self) -> usize {
                4
            }
            fn encode(
                &self,
                texts: &[String],
                _kind: EncodeKind,
            ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
                Ok(texts.iter().map(|_| vec![0.0; 3]).collect())
            }
        }

        let err = RetryPolicy::default()
            .encode_with_retry(&WrongDim, &["a".into()], EncodeKind::Document)
            .unwrap_err();
        assert!(matches!(err, EngineError::ProviderPermanent(_)));
    }
}
