//! The searcher: query pipeline over an opened index.
//!
//! Per query: embed the query text (one provider call), evaluate metadata
//! filters, pick a route (graph traversal, or brute force when the filter
//! is highly selective), optionally rescore the beam with BM25, optionally
//! post-sort by timestamp, and materialize passages.
//!
//! `sort_by = date_*` is a post-sort over the beam, not a temporally-aware
//! search: recall of the genuinely most recent passages is bounded by the
//! beam width (`ef_search` / `top_k_rescore`).

use crate::backend::GraphBackend;
use crate::cache::VectorCache;
use crate::expander::{BlobSource, CancelToken, EmbeddingBlob, RecomputeSource, SearchLimits};
use crate::filter::{parse_timestamp, FilterSet, SearchFilters};
use crate::meta::{IndexPaths, Manifest};
use crate::provider::{EmbeddingProvider, EncodeKind, RetryPolicy};
use crate::{EngineError, Result};
use chrono::{DateTime, Utc};
use kombu_lexical::{Bm25Index, Bm25Params, TOKENIZER_ID};
use kombu_passage::{Passage, PassageStore};
use kombu_vector::{brute_force_top_k, Interrupt, Neighbor, NodeId, VectorError};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result ordering after scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    #[default]
    Relevance,
    DateDesc,
    DateAsc,
}

/// Per-query options.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Beam width; defaults to the manifest's `ef_search_default`.
    pub ef_search: Option<usize>,
    /// Hybrid weight: 0 = vector only, 1 = BM25 only.
    pub alpha: f32,
    pub sort_by: SortBy,
    pub filters: Option<SearchFilters>,
    /// Shorthand timestamp bounds, merged into `filters`.
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    /// Candidate pool for hybrid rescoring and date sorting; clamped up
    /// to `k`.
    pub top_k_rescore: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub cancel: Option<CancelToken>,
    /// BM25 parameter overrides.
    pub bm25: Option<Bm25Params>,
    /// Filter selectivity below which graph search is skipped for a
    /// brute-force scan of the allowed set. Default 1%.
    pub selectivity_threshold: Option<f64>,
}

/// Which path produced the results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchRoute {
    /// Graph beam search.
    Graph,
    /// Brute-force scan of a filtered allowed set.
    BruteForce,
    /// Lexical-only (empty query with `alpha = 1`).
    Lexical,
}

/// One scored passage.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub passage: Passage,
    pub node: NodeId,
    /// Metric distance to the query (lower = closer).
    pub distance: f32,
    /// Final ranking score (higher = better). Equals vector similarity
    /// when `alpha = 0`, the hybrid combination otherwise.
    pub score: f32,
}

/// Response envelope.
#[derive(Debug)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    /// True when the response is degraded (dropped batches, deadline, or
    /// cancellation).
    pub partial: bool,
    pub reason: Option<String>,
    pub route: SearchRoute,
}

impl SearchResponse {
    fn empty(route: SearchRoute) -> Self {
        Self {
            results: Vec::new(),
            partial: false,
            reason: None,
            route,
        }
    }
}

/// An opened, validated index directory. Read-only; cheap to share.
pub struct Index {
    paths: IndexPaths,
    manifest: Manifest,
    store: PassageStore,
    backend: GraphBackend,
    blob: Option<EmbeddingBlob>,
    bm25: Mutex<Option<Arc<Bm25Index>>>,
}

impl Index {
    /// Open an index named `name` in `dir`, running the cheap consistency
    /// checks (counts agree across manifest, store, and graph; blob shape
    /// matches; graph header sane). [`Index::verify`] is the deep pass.
    pub fn open(dir: impl AsRef<Path>, name: &str) -> Result<Self> {
        let dir = dir.as_ref();
        let paths = IndexPaths::new(dir, name);
        let manifest = Manifest::load(&paths.meta)?;

        let store = PassageStore::open(
            dir.join(&manifest.files.passages),
            dir.join(&manifest.files.offsets),
        )?;
        let backend = GraphBackend::open(&manifest, dir.join(&manifest.files.graph))?;

        let n = manifest.num_passages as usize;
        if store.len() != n || backend.len() != n {
            return Err(EngineError::Corrupt(format!(
                "manifest says {} passages, store holds {}, graph holds {}",
                n,
                store.len(),
                backend.len()
            )));
        }

        let blob = match (&manifest.files.embeddings, manifest.recompute) {
            (Some(name), false) => Some(EmbeddingBlob::open(
                dir.join(name),
                n,
                manifest.dimension as usize,
            )?),
            _ => None,
        };

        tracing::debug!(passages = n, backend = ?manifest.backend, "index opened");

        Ok(Self {
            paths,
            manifest,
            store,
            backend,
            blob,
            bm25: Mutex::new(None),
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn store(&self) -> &PassageStore {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Deep health check: graph CRC and edge invariants, plus sidecar
    /// consistency. The cheap checks already ran at open.
    pub fn verify(&self) -> Result<()> {
        self.backend.verify()?;

        if self.paths.bm25.exists() {
            let sidecar = Bm25Index::load(&self.paths.bm25)?;
            if sidecar.doc_count() != self.len() {
                return Err(EngineError::Corrupt(format!(
                    "lexical sidecar indexes {} docs, store holds {}",
                    sidecar.doc_count(),
                    self.len()
                )));
            }
        }
        Ok(())
    }

    /// The lexical sidecar, loading or (re)building it on first use.
    fn lexical(&self) -> Result<Arc<Bm25Index>> {
        let mut guard = self.bm25.lock();
        if let Some(existing) = guard.as_ref() {
            return Ok(Arc::clone(existing));
        }

        let loaded = match Bm25Index::load(&self.paths.bm25) {
            Ok(sidecar) if sidecar.doc_count() == self.len() => Some(sidecar),
            Ok(sidecar) => {
                tracing::warn!(
                    sidecar_docs = sidecar.doc_count(),
                    store_docs = self.len(),
                    "lexical sidecar count mismatch, rebuilding"
                );
                None
            }
            Err(_) => None,
        };

        let sidecar = match loaded {
            Some(sidecar) => sidecar,
            None => {
                let texts: Vec<String> = self
                    .store
                    .iter()
                    .map(|p| p.map(|p| p.text))
                    .collect::<kombu_passage::Result<_>>()?;
                let built = Bm25Index::build(texts.iter().map(String::as_str));
                built.save(&self.paths.bm25)?;
                tracing::debug!(docs = built.doc_count(), "lexical sidecar built");
                built
            }
        };

        let arc = Arc::new(sidecar);
        *guard = Some(Arc::clone(&arc));
        Ok(arc)
    }
}

/// Searcher configuration (per searcher, not per query).
#[derive(Debug, Clone)]
pub struct SearcherConfig {
    /// Nodes per embedding request inside the candidate expander.
    pub batch_size: usize,
    pub retry: RetryPolicy,
    /// Recompute cache capacity, in vectors.
    pub cache_capacity: usize,
    /// Optional recompute cache ceiling, in bytes.
    pub cache_byte_budget: Option<usize>,
}

impl Default for SearcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            retry: RetryPolicy::default(),
            cache_capacity: 4096,
            cache_byte_budget: None,
        }
    }
}

/// A searcher over one index with one provider.
///
/// Holds the per-searcher recompute cache; run one searcher per thread of
/// query parallelism.
pub struct Searcher {
    index: Arc<Index>,
    provider: Arc<dyn EmbeddingProvider>,
    config: SearcherConfig,
    cache: Mutex<VectorCache>,
}

impl std::fmt::Debug for Searcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Searcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Searcher {
    /// Open `dir/name` and bind it to `provider`, refusing a model
    /// mismatch.
    pub fn open(
        dir: impl AsRef<Path>,
        name: &str,
        provider: Arc<dyn EmbeddingProvider>,
        config: SearcherConfig,
    ) -> Result<Self> {
        let index = Arc::new(Index::open(dir, name)?);
        Self::over(index, provider, config)
    }

    /// Bind an already-opened index.
    pub fn over(
        index: Arc<Index>,
        provider: Arc<dyn EmbeddingProvider>,
        config: SearcherConfig,
    ) -> Result<Self> {
        let manifest = index.manifest();
        if manifest.model_id != provider.model_id()
            || manifest.dimension as usize != provider.dimension()
        {
            return Err(EngineError::ModelMismatch {
                expected: format!("{} ({}d)", manifest.model_id, manifest.dimension),
                actual: format!("{} ({}d)", provider.model_id(), provider.dimension()),
            });
        }

        let cache = VectorCache::new(config.cache_capacity, config.cache_byte_budget);
        Ok(Self {
            index,
            provider,
            config,
            cache: Mutex::new(cache),
        })
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Touch every mapped page of the index artifacts so first-query
    /// latency is not paid in page faults. Returns the time taken.
    pub fn warmup(&self) -> Duration {
        let start = Instant::now();
        let mut bytes = self.index.store.prefault();
        bytes += self.index.backend.prefault();
        if let Some(blob) = &self.index.blob {
            bytes += blob.prefault();
        }
        let elapsed = start.elapsed();
        tracing::debug!(bytes, elapsed_ms = elapsed.as_millis() as u64, "warmup complete");
        elapsed
    }

    /// Answer a query. See the module docs for the pipeline.
    pub fn search(
        &self,
        query_text: &str,
        k: usize,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        if !(0.0..=1.0).contains(&options.alpha) {
            return Err(EngineError::InvalidInput(format!(
                "alpha must be in [0, 1], got {}",
                options.alpha
            )));
        }
        if k == 0 {
            // Short-circuit: no provider call at all.
            return Ok(SearchResponse::empty(SearchRoute::Graph));
        }

        if query_text.trim().is_empty() {
            if options.alpha >= 1.0 {
                // Pure-lexical queries rank by tokens; an empty query has
                // none.
                return Ok(SearchResponse::empty(SearchRoute::Lexical));
            }
            return Err(EngineError::InvalidInput("empty query text".into()));
        }

        let mut filters = options.filters.clone().unwrap_or_default();
        filters.date_from = filters.date_from.or(options.date_from);
        filters.date_to = filters.date_to.or(options.date_to);

        let filter_set = FilterSet::evaluate(Some(&filters), &self.index.store);
        if filter_set
            .allowed
            .as_ref()
            .is_some_and(|allowed| allowed.is_empty())
        {
            return Ok(SearchResponse::empty(SearchRoute::BruteForce));
        }

        // One provider call per query, regardless of k.
        let query_vec = self.embed_query(query_text)?;

        let limits = SearchLimits {
            deadline: options
                .timeout_ms
                .map(|ms| Instant::now() + Duration::from_millis(ms)),
            cancel: options.cancel.clone(),
        };

        let rescore_k = options.top_k_rescore.unwrap_or(k).max(k);
        let beam = options
            .ef_search
            .unwrap_or_else(|| self.default_beam())
            .max(rescore_k);

        let threshold = options.selectivity_threshold.unwrap_or(0.01);
        let brute = filter_set.allowed.is_some() && filter_set.selectivity() < threshold;

        let (candidates, partial, reason, route) = if brute {
            let allowed = filter_set.allowed.as_deref().unwrap_or(&[]);
            self.brute_force(&query_vec, allowed, rescore_k, &limits)?
        } else {
            self.graph_search(&query_vec, &filter_set, rescore_k, beam, &limits)?
        };

        if route == SearchRoute::Graph && reason.as_deref() == Some("cancelled") {
            return Ok(SearchResponse {
                results: Vec::new(),
                partial: true,
                reason,
                route,
            });
        }

        let mut scored = self.score(query_text, candidates, options)?;
        sort_for_output(&mut scored, options.sort_by, &self.index.store);
        scored.truncate(k);

        let results = scored
            .into_iter()
            .map(|c| {
                self.index.store.get_by_node(c.neighbor.node).map(|passage| SearchResult {
                    passage,
                    node: c.neighbor.node,
                    distance: c.neighbor.distance,
                    score: c.score,
                })
            })
            .collect::<kombu_passage::Result<Vec<_>>>()?;

        Ok(SearchResponse {
            results,
            partial,
            reason,
            route,
        })
    }

    fn default_beam(&self) -> usize {
        self.index
            .manifest
            .hnsw
            .as_ref()
            .map(|h| h.ef_search_default as usize)
            .unwrap_or(64)
    }

    fn embed_query(&self, query_text: &str) -> Result<Vec<f32>> {
        let text = match &self.index.manifest.query_prompt_template {
            Some(prompt) => format!("{}{}", prompt, query_text),
            None => query_text.to_string(),
        };
        let mut vectors = self.config.retry.encode_with_retry(
            self.provider.as_ref(),
            &[text],
            EncodeKind::Query,
        )?;
        Ok(vectors.remove(0))
    }

    /// Graph route: beam search through the appropriate expander.
    fn graph_search(
        &self,
        query_vec: &[f32],
        filter_set: &FilterSet,
        rescore_k: usize,
        beam: usize,
        limits: &SearchLimits,
    ) -> Result<(Vec<Neighbor>, bool, Option<String>, SearchRoute)> {
        let mask = filter_set.mask();
        // The entry point routes even when filtered out of the results;
        // excluding it would strand the traversal before it starts.
        let exempt = mask.as_ref().map(|_| self.index.backend.entry_point());
        let metric = self.index.manifest.metric;

        let (mut outcome, degraded) = match &self.index.blob {
            Some(blob) => {
                let mut source = BlobSource::new(blob, mask.clone(), exempt, limits.clone());
                let outcome = self.index.backend.search(
                    &mut source,
                    query_vec,
                    metric,
                    rescore_k,
                    beam,
                )?;
                (outcome, false)
            }
            None => {
                let mut source = RecomputeSource::new(
                    &self.index.store,
                    self.provider.as_ref(),
                    &self.cache,
                    self.config.retry,
                    self.config.batch_size,
                    self.index.manifest.document_prompt_template.as_deref(),
                    mask.clone(),
                    exempt,
                    limits.clone(),
                );
                let outcome = self.index.backend.search(
                    &mut source,
                    query_vec,
                    metric,
                    rescore_k,
                    beam,
                )?;
                let degraded = source.degraded();
                (outcome, degraded)
            }
        };

        // The exempt entry point routed the traversal; if the filter
        // excludes it, it must not leak into the results.
        if let Some(mask) = &mask {
            outcome
                .neighbors
                .retain(|n| mask.get(n.node as usize).copied().unwrap_or(false));
        }

        // A search where every batch failed yields nothing to return and
        // aborts rather than degrading.
        if degraded && outcome.neighbors.is_empty() && outcome.interrupt.is_none() {
            return Err(EngineError::ProviderTransient(
                "every embedding batch failed during search".into(),
            ));
        }

        let (partial, reason) = match (outcome.interrupt, degraded) {
            (Some(Interrupt::Cancelled), _) => (true, Some("cancelled".to_string())),
            (Some(Interrupt::DeadlineExceeded), _) => {
                (true, Some("deadline_exceeded".to_string()))
            }
            (None, true) => (true, Some("provider_transient_exhausted".to_string())),
            (None, false) => (false, None),
        };

        if partial {
            tracing::warn!(
                reason = reason.as_deref().unwrap_or(""),
                returned = outcome.neighbors.len(),
                dropped = outcome.dropped,
                "degraded search response"
            );
        }

        Ok((outcome.neighbors, partial, reason, SearchRoute::Graph))
    }

    /// Brute-force route for highly selective filters: exact distances over
    /// the allowed set, no graph traversal.
    fn brute_force(
        &self,
        query_vec: &[f32],
        allowed: &[NodeId],
        rescore_k: usize,
        limits: &SearchLimits,
    ) -> Result<(Vec<Neighbor>, bool, Option<String>, SearchRoute)> {
        let metric = self.index.manifest.metric;

        tracing::debug!(
            allowed = allowed.len(),
            "filter below selectivity threshold, scanning allowed set"
        );

        let searched = match &self.index.blob {
            Some(blob) => {
                let mut source = BlobSource::new(blob, None, None, limits.clone());
                brute_force_top_k(
                    &mut source,
                    query_vec,
                    metric,
                    allowed,
                    rescore_k,
                    self.config.batch_size,
                )
            }
            None => {
                let mut source = RecomputeSource::new(
                    &self.index.store,
                    self.provider.as_ref(),
                    &self.cache,
                    self.config.retry,
                    self.config.batch_size,
                    self.index.manifest.document_prompt_template.as_deref(),
                    None,
                    None,
                    limits.clone(),
                );
                let neighbors = brute_force_top_k(
                    &mut source,
                    query_vec,
                    metric,
                    allowed,
                    rescore_k,
                    self.config.batch_size,
                );
                match neighbors {
                    Ok(n) if source.degraded() => {
                        return Ok((
                            n,
                            true,
                            Some("provider_transient_exhausted".to_string()),
                            SearchRoute::BruteForce,
                        ));
                    }
                    other => other,
                }
            }
        };

        match searched {
            Ok(neighbors) => Ok((neighbors, false, None, SearchRoute::BruteForce)),
            Err(VectorError::Cancelled) => Ok((
                Vec::new(),
                true,
                Some("cancelled".to_string()),
                SearchRoute::BruteForce,
            )),
            Err(VectorError::DeadlineExceeded) => Ok((
                Vec::new(),
                true,
                Some("deadline_exceeded".to_string()),
                SearchRoute::BruteForce,
            )),
            Err(err) => Err(err.into()),
        }
    }

    /// Final scores: raw vector similarity at `alpha = 0`, min-max
    /// normalized hybrid otherwise.
    fn score(
        &self,
        query_text: &str,
        candidates: Vec<Neighbor>,
        options: &SearchOptions,
    ) -> Result<Vec<Scored>> {
        let metric = self.index.manifest.metric;

        if options.alpha == 0.0 || candidates.is_empty() {
            return Ok(candidates
                .into_iter()
                .map(|neighbor| Scored {
                    score: metric.similarity(neighbor.distance),
                    neighbor,
                })
                .collect());
        }

        if self.index.manifest.tokenizer != TOKENIZER_ID {
            return Err(EngineError::InvalidInput(format!(
                "index tokenizer {:?} differs from this build's {:?}; hybrid scoring refused",
                self.index.manifest.tokenizer, TOKENIZER_ID
            )));
        }

        let lexical = self.index.lexical()?;
        let nodes: Vec<NodeId> = candidates.iter().map(|c| c.node).collect();
        let bm25 = lexical.scores(
            query_text,
            &nodes,
            options.bm25.unwrap_or_default(),
        );

        let sims: Vec<f32> = candidates
            .iter()
            .map(|c| metric.similarity(c.distance))
            .collect();
        let norm_sims = min_max_normalize(&sims);
        let norm_bm25 = min_max_normalize(&bm25);

        let alpha = options.alpha;
        let mut scored: Vec<Scored> = candidates
            .into_iter()
            .zip(norm_sims.iter().zip(&norm_bm25))
            .map(|(neighbor, (&s, &b))| Scored {
                score: (1.0 - alpha) * s + alpha * b,
                neighbor,
            })
            .collect();

        // Rank by hybrid score; ties fall back to the vector ordering.
        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.neighbor.cmp(&b.neighbor))
        });
        Ok(scored)
    }
}

struct Scored {
    neighbor: Neighbor,
    score: f32,
}

/// Min-max over the candidate set. Degenerate sets (singleton or constant)
/// normalize to all-equal scores so the vector ordering decides.
fn min_max_normalize(values: &[f32]) -> Vec<f32> {
    if values.len() <= 1 {
        return vec![1.0; values.len()];
    }
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let span = max - min;
    if !(span > f32::EPSILON) {
        return vec![1.0; values.len()];
    }
    values.iter().map(|&v| (v - min) / span).collect()
}

fn sort_for_output(scored: &mut [Scored], sort_by: SortBy, store: &PassageStore) {
    match sort_by {
        SortBy::Relevance => {
            // `score` already ordered the slice; nothing further.
        }
        SortBy::DateDesc | SortBy::DateAsc => {
            let timestamp = |s: &Scored| -> Option<DateTime<Utc>> {
                store
                    .metadata_of(s.neighbor.node)
                    .and_then(|m| m.get("timestamp"))
                    .and_then(|v| v.as_str())
                    .and_then(parse_timestamp)
            };
            // Stable sort: equal timestamps keep the relevance order.
            // Passages without a timestamp go last either way.
            scored.sort_by(|a, b| {
                let (ta, tb) = (timestamp(a), timestamp(b));
                match (ta, tb) {
                    (None, None) => std::cmp::Ordering::Equal,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (Some(ta), Some(tb)) => {
                        if sort_by == SortBy::DateDesc {
                            tb.cmp(&ta)
                        } else {
                            ta.cmp(&tb)
                        }
                    }
                }
            });
        }
    }
}
