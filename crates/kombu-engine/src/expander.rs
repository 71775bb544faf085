//! Candidate expanders: the engine-side [`VectorSource`] implementations.
//!
//! Graph backends pull embeddings through one of these. `BlobSource` reads
//! the memory-mapped embedding blob; `RecomputeSource` resolves node
//! indices to passage text and re-embeds it through the provider, with an
//! LRU cache in front. Both honor the metadata filter mask and check the
//! cancellation token and deadline at batch boundaries, which makes them
//! the search's sole suspension points.

use crate::cache::VectorCache;
use crate::provider::{EmbeddingProvider, EncodeKind, RetryPolicy};
use crate::EngineError;
use kombu_passage::PassageStore;
use kombu_vector::{FetchBatch, NodeId, VectorError, VectorSource};
use memmap2::Mmap;
use parking_lot::Mutex;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Cooperative cancellation handle; clone freely, flip once.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Deadline and cancellation, checked at every batch boundary.
#[derive(Debug, Clone, Default)]
pub struct SearchLimits {
    pub deadline: Option<Instant>,
    pub cancel: Option<CancelToken>,
}

impl SearchLimits {
    fn check(&self) -> Result<(), VectorError> {
        if let Some(token) = &self.cancel {
            if token.is_cancelled() {
                return Err(VectorError::Cancelled);
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(VectorError::DeadlineExceeded);
            }
        }
        Ok(())
    }
}

/// The memory-mapped embedding blob: `N` rows of `D` little-endian f32s,
/// no header.
pub struct EmbeddingBlob {
    mmap: Mmap,
    n: usize,
    dimension: usize,
}

impl EmbeddingBlob {
    /// Open the blob, validating its size against the manifest's shape.
    pub fn open(path: impl AsRef<Path>, n: usize, dimension: usize) -> crate::Result<Self> {
        let file = File::open(path.as_ref())?;
        // Safety: the index directory owns the file and builders replace it
        // atomically; it is never truncated while mapped.
        let mmap = unsafe { Mmap::map(&file)? };

        let expected = n * dimension * 4;
        if mmap.len() != expected {
            return Err(EngineError::Corrupt(format!(
                "embedding blob holds {} bytes, expected {} ({} x {} f32)",
                mmap.len(),
                expected,
                n,
                dimension
            )));
        }
        Ok(Self { mmap, n, dimension })
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Copy out row `node`.
    pub fn row(&self, node: NodeId) -> Vec<f32> {
        let start = node as usize * self.dimension * 4;
        self.mmap[start..start + self.dimension * 4]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes(b.try_into().expect("4-byte chunk")))
            .collect()
    }

    /// Touch every mapped page; returns bytes walked. Used by warmup.
    pub fn prefault(&self) -> u64 {
        let mut acc = 0u64;
        for chunk in self.mmap.chunks(4096) {
            acc = acc.wrapping_add(chunk[0] as u64);
        }
        std::hint::black_box(acc);
        self.mmap.len() as u64
    }
}

/// Expander over the embedding blob (non-recompute indexes).
pub struct BlobSource<'a> {
    blob: &'a EmbeddingBlob,
    /// Dense membership mask from the metadata filter.
    mask: Option<Vec<bool>>,
    /// Node exempt from the mask (the graph entry point, so a filtered
    /// entry cannot strand the whole traversal).
    exempt: Option<NodeId>,
    limits: SearchLimits,
}

impl<'a> BlobSource<'a> {
    pub fn new(
        blob: &'a EmbeddingBlob,
        mask: Option<Vec<bool>>,
        exempt: Option<NodeId>,
        limits: SearchLimits,
    ) -> Self {
        Self {
            blob,
            mask,
            exempt,
            limits,
        }
    }

    fn allowed(&self, node: NodeId) -> bool {
        if self.exempt == Some(node) {
            return true;
        }
        match &self.mask {
            Some(mask) => mask.get(node as usize).copied().unwrap_or(false),
            None => true,
        }
    }
}

impl VectorSource for BlobSource<'_> {
    fn dimension(&self) -> usize {
        self.blob.dimension()
    }

    fn fetch(&mut self, nodes: &[NodeId]) -> kombu_vector::Result<FetchBatch> {
        self.limits.check()?;

        let dim = self.blob.dimension();
        let mut batch = FetchBatch::default();
        for &node in nodes {
            if (node as usize) < self.blob.len() && self.allowed(node) {
                batch.nodes.push(node);
                batch.vectors.extend(self.blob.row(node));
            }
        }
        debug_assert_eq!(batch.vectors.len(), batch.nodes.len() * dim);
        Ok(batch)
    }
}

/// Expander that re-embeds passage text on demand (recompute indexes).
pub struct RecomputeSource<'a> {
    store: &'a PassageStore,
    provider: &'a dyn EmbeddingProvider,
    cache: &'a Mutex<VectorCache>,
    retry: RetryPolicy,
    batch_size: usize,
    document_prompt: Option<&'a str>,
    mask: Option<Vec<bool>>,
    exempt: Option<NodeId>,
    limits: SearchLimits,
    degraded: bool,
}

impl<'a> RecomputeSource<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: &'a PassageStore,
        provider: &'a dyn EmbeddingProvider,
        cache: &'a Mutex<VectorCache>,
        retry: RetryPolicy,
        batch_size: usize,
        document_prompt: Option<&'a str>,
        mask: Option<Vec<bool>>,
        exempt: Option<NodeId>,
        limits: SearchLimits,
    ) -> Self {
        Self {
            store,
            provider,
            cache,
            retry,
            batch_size: batch_size.max(1),
            document_prompt,
            mask,
            exempt,
            limits,
            degraded: false,
        }
    }

    /// True when at least one embedding batch was dropped after exhausting
    /// retries; the response is demoted to partial.
    pub fn degraded(&self) -> bool {
        self.degraded
    }

    fn allowed(&self, node: NodeId) -> bool {
        if self.exempt == Some(node) {
            return true;
        }
        match &self.mask {
            Some(mask) => mask.get(node as usize).copied().unwrap_or(false),
            None => true,
        }
    }

    fn text_of(&self, node: NodeId) -> kombu_vector::Result<String> {
        let passage = self
            .store
            .get_by_node(node)
            .map_err(|e| VectorError::Source(e.to_string()))?;
        Ok(match self.document_prompt {
            Some(prompt) => format!("{}{}", prompt, passage.text),
            None => passage.text,
        })
    }
}

impl VectorSource for RecomputeSource<'_> {
    fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    fn fetch(&mut self, nodes: &[NodeId]) -> kombu_vector::Result<FetchBatch> {
        self.limits.check()?;

        let dim = self.provider.dimension();
        let mut batch = FetchBatch::default();

        // Cache pass under one short lock.
        let mut misses: Vec<NodeId> = Vec::new();
        {
            let mut cache = self.cache.lock();
            for &node in nodes {
                if !self.allowed(node) || (node as usize) >= self.store.len() {
                    continue;
                }
                match cache.get(node) {
                    Some(vector) => {
                        batch.nodes.push(node);
                        batch.vectors.extend_from_slice(vector);
                    }
                    None => misses.push(node),
                }
            }
        }

        for chunk in misses.chunks(self.batch_size) {
            self.limits.check()?;

            let texts: Vec<String> = chunk
                .iter()
                .map(|&n| self.text_of(n))
                .collect::<kombu_vector::Result<_>>()?;

            match self
                .retry
                .encode_with_retry(self.provider, &texts, EncodeKind::Document)
            {
                Ok(vectors) => {
                    let mut cache = self.cache.lock();
                    for (&node, vector) in chunk.iter().zip(vectors) {
                        batch.nodes.push(node);
                        batch.vectors.extend_from_slice(&vector);
                        cache.insert(node, vector);
                    }
                }
                Err(EngineError::ProviderTransient(msg)) => {
                    // Retries exhausted: drop the chunk, degrade the
                    // response, keep searching.
                    tracing::warn!(error = %msg, chunk = chunk.len(), "recompute batch dropped");
                    self.degraded = true;
                }
                Err(err) => return Err(VectorError::Source(err.to_string())),
            }
        }

        debug_assert_eq!(batch.vectors.len(), batch.nodes.len() * dim);
        Ok(batch)
    }
}
