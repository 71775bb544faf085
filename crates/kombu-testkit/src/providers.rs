//! Mock embedding providers.

use kombu_engine::{EmbeddingProvider, EncodeKind, ProviderError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Provider returning hand-picked vectors for known texts.
///
/// Unknown texts fail permanently, which makes a test that embeds something
/// unexpected fail loudly instead of silently scoring garbage.
pub struct FixtureProvider {
    model_id: String,
    dimension: usize,
    normalized: bool,
    vectors: HashMap<String, Vec<f32>>,
    encode_calls: AtomicUsize,
    texts_encoded: AtomicUsize,
}

impl FixtureProvider {
    pub fn new(model_id: impl Into<String>, dimension: usize) -> Self {
        Self {
            model_id: model_id.into(),
            dimension,
            normalized: false,
            vectors: HashMap::new(),
            encode_calls: AtomicUsize::new(0),
            texts_encoded: AtomicUsize::new(0),
        }
    }

    /// Declare the fixture vectors unit-norm.
    pub fn unit_norm(mut self) -> Self {
        self.normalized = true;
        self
    }

    /// Register the vector a text embeds to.
    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        assert_eq!(vector.len(), self.dimension, "fixture vector has wrong dimension");
        self.vectors.insert(text.into(), vector);
        self
    }

    /// Number of `encode` calls so far.
    pub fn encode_calls(&self) -> usize {
        self.encode_calls.load(Ordering::SeqCst)
    }

    /// Number of texts embedded so far.
    pub fn texts_encoded(&self) -> usize {
        self.texts_encoded.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for FixtureProvider {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn normalized(&self) -> bool {
        self.normalized
    }

    fn encode(
        &self,
        texts: &[String],
        _kind: EncodeKind,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.encode_calls.fetch_add(1, Ordering::SeqCst);
        self.texts_encoded.fetch_add(texts.len(), Ordering::SeqCst);
        texts
            .iter()
            .map(|t| {
                self.vectors
                    .get(t)
                    .cloned()
                    .ok_or_else(|| ProviderError::Permanent(format!("no fixture for {:?}", t)))
            })
            .collect()
    }
}

/// Deterministic pseudo-embeddings derived from a text hash.
///
/// The same text always maps to the same unit-norm vector, so recompute
/// parity and rebuild-idempotence tests hold without a real model.
pub struct HashProvider {
    model_id: String,
    dimension: usize,
    encode_calls: AtomicUsize,
}

impl HashProvider {
    pub fn new(model_id: impl Into<String>, dimension: usize) -> Self {
        assert!(dimension > 0);
        Self {
            model_id: model_id.into(),
            dimension,
            encode_calls: AtomicUsize::new(0),
        }
    }

    pub fn encode_calls(&self) -> usize {
        self.encode_calls.load(Ordering::SeqCst)
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        // FNV-1a over the text seeds a small xorshift stream.
        let mut state = 0xcbf2_9ce4_8422_2325u64;
        for b in text.as_bytes() {
            state ^= u64::from(*b);
            state = state.wrapping_mul(0x0000_0100_0000_01b3);
        }
        if state == 0 {
            state = 0x9e37_79b9;
        }

        let mut vector: Vec<f32> = (0..self.dimension)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                // Spread into [-1, 1].
                ((state >> 40) as f32 / (1 << 23) as f32) * 2.0 - 1.0
            })
            .collect();

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        } else {
            vector[0] = 1.0;
        }
        vector
    }
}

impl EmbeddingProvider for HashProvider {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn normalized(&self) -> bool {
        true
    }

    fn encode(
        &self,
        texts: &[String],
        _kind: EncodeKind,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.encode_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Wraps a provider with a deterministic transient-failure schedule.
///
/// Fails every call whose (zero-based) sequence number `i` satisfies
/// `i % period >= period - burst`, so each period opens healthy and ends
/// with a burst of `burst` consecutive failures. A burst longer than the
/// retry budget exhausts it and forces the caller's degraded path.
pub struct FlakyProvider<P> {
    inner: P,
    period: usize,
    burst: usize,
    documents_only: bool,
    calls: Mutex<usize>,
}

impl<P: EmbeddingProvider> FlakyProvider<P> {
    pub fn new(inner: P, period: usize, burst: usize) -> Self {
        assert!(period > 0 && burst < period, "burst must leave some calls healthy");
        Self {
            inner,
            period,
            burst,
            documents_only: false,
            calls: Mutex::new(0),
        }
    }

    /// Only fail `EncodeKind::Document` calls; query embedding stays
    /// reliable.
    pub fn documents_only(mut self) -> Self {
        self.documents_only = true;
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

impl<P: EmbeddingProvider> EmbeddingProvider for FlakyProvider<P> {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn normalized(&self) -> bool {
        self.inner.normalized()
    }

    fn encode(
        &self,
        texts: &[String],
        kind: EncodeKind,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        if self.documents_only && kind == EncodeKind::Query {
            return self.inner.encode(texts, kind);
        }
        let seq = {
            let mut calls = self.calls.lock();
            let seq = *calls;
            *calls += 1;
            seq
        };
        if seq % self.period >= self.period - self.burst {
            return Err(ProviderError::Transient(format!(
                "injected transient failure (call {})",
                seq
            )));
        }
        self.inner.encode(texts, kind)
    }
}
