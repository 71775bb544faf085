//! Index builder.
//!
//! `build` ingests documents, embeds them through a worker pool, hands the
//! vectors to the chosen graph backend, optionally compacts and prunes, and
//! finalizes the index directory atomically (every artifact lands via temp +
//! rename, manifest last). A build that dies mid-way leaves no valid
//! manifest, so the next build starts over; its temp droppings are removed
//! by age on the next run.
//!
//! Node order is passage order by construction: documents are sorted by id
//! before node indices are assigned, and compaction rewrites passages,
//! offsets and the blob under the same permutation as the graph. Together
//! with the seeded layer draw this makes rebuilds of the same corpus
//! byte-identical regardless of document arrival order.

use crate::lock::{gc_stale_temps, DirLock};
use crate::meta::{BackendKind, FilesMeta, HnswMeta, IndexPaths, Manifest, VamanaMeta, MANIFEST_VERSION};
use crate::provider::{EmbeddingProvider, EncodeKind, RetryPolicy};
use crate::{EngineError, Result};
use kombu_hnsw::HnswParams;
use kombu_lexical::TOKENIZER_ID;
use kombu_passage::{Passage, PassageStore, PassageWriter};
use kombu_vamana::VamanaParams;
use kombu_vector::{Metric, SliceSource};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// What to do when the document sequence repeats an id.
///
/// Ids already present in the index are always skipped (idempotent rebuild);
/// this policy governs repeats within one `build` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Skip the repeat and count it.
    Skip,
    /// Abort the build.
    Strict,
}

/// A document handed to the builder.
#[derive(Debug, Clone)]
pub struct Document {
    /// Stable id; derived from a content hash when absent.
    pub id: Option<String>,
    pub text: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: text.into(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_metadata(
        mut self,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Build parameters.
#[derive(Debug, Clone)]
pub struct BuildParams {
    /// Artifact name stem inside the output directory.
    pub name: String,
    pub backend: BackendKind,
    pub metric: Metric,
    /// Omit the embedding blob; search re-embeds passage text on demand.
    pub recompute: bool,
    /// Reorder nodes for locality after the graph is built (HNSW only).
    pub compact: bool,
    /// Occlusion-prune graph edges with this threshold.
    pub prune_threshold: Option<f32>,
    pub hnsw: HnswParams,
    pub vamana: VamanaParams,
    /// Recorded in the manifest as the search-time default beam.
    pub ef_search_default: usize,
    /// Texts per provider call.
    pub batch_size: usize,
    /// Embedding worker threads.
    pub workers: usize,
    pub retry: RetryPolicy,
    pub duplicates: DuplicatePolicy,
    pub query_prompt_template: Option<String>,
    pub document_prompt_template: Option<String>,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            name: "index".into(),
            backend: BackendKind::Hnsw,
            metric: Metric::Cosine,
            recompute: true,
            compact: true,
            prune_threshold: None,
            hnsw: HnswParams::default(),
            vamana: VamanaParams::default(),
            ef_search_default: 64,
            batch_size: 64,
            workers: 4,
            retry: RetryPolicy::default(),
            duplicates: DuplicatePolicy::Skip,
            query_prompt_template: None,
            document_prompt_template: None,
        }
    }
}

/// Build phases reported through the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildPhase {
    Ingest,
    Embed,
    Graph,
    Finalize,
}

/// Outcome of a successful build.
#[derive(Debug)]
pub struct BuildReport {
    pub manifest: Manifest,
    /// Documents skipped as duplicates (within the batch or already
    /// indexed).
    pub skipped_duplicates: usize,
}

/// Build an index in `output_dir`.
///
/// `progress(phase, done, total)` is invoked from the calling thread; it
/// never blocks the worker pool.
pub fn build(
    output_dir: impl AsRef<Path>,
    params: &BuildParams,
    documents: impl IntoIterator<Item = Document>,
    provider: &dyn EmbeddingProvider,
    mut progress: impl FnMut(BuildPhase, usize, usize),
) -> Result<BuildReport> {
    let output_dir = output_dir.as_ref();
    std::fs::create_dir_all(output_dir)?;
    let paths = IndexPaths::new(output_dir, &params.name);

    let _lock = DirLock::acquire(&paths.lock)?;
    gc_stale_temps(output_dir)?;

    if provider.dimension() == 0 {
        return Err(EngineError::InvalidInput("provider declares dimension 0".into()));
    }

    // ---- Ingest ------------------------------------------------------
    let existing = load_existing_passages(&paths, provider.model_id())?;
    let mut seen: HashSet<String> = existing.iter().map(|p| p.id.clone()).collect();
    let mut passages: Vec<Passage> = existing;
    let mut skipped = 0usize;

    let docs: Vec<Document> = documents.into_iter().collect();
    let ingest_total = docs.len();
    for (i, doc) in docs.into_iter().enumerate() {
        let id = doc.id.unwrap_or_else(|| content_id(&doc.text));
        if seen.contains(&id) {
            match params.duplicates {
                DuplicatePolicy::Skip => {
                    skipped += 1;
                    progress(BuildPhase::Ingest, i + 1, ingest_total);
                    continue;
                }
                DuplicatePolicy::Strict => return Err(EngineError::DuplicateId(id)),
            }
        }
        seen.insert(id.clone());
        passages.push(Passage {
            id,
            text: doc.text,
            metadata: doc.metadata,
        });
        progress(BuildPhase::Ingest, i + 1, ingest_total);
    }

    if passages.is_empty() {
        return Err(EngineError::InvalidInput("cannot build an empty index".into()));
    }

    // Canonical node order: sorted by id. With the fixed layer seed this
    // makes the graph file a pure function of the corpus.
    passages.sort_by(|a, b| a.id.cmp(&b.id));
    let n = passages.len();
    tracing::info!(passages = n, skipped, "ingest complete");

    // ---- Embed -------------------------------------------------------
    let texts: Vec<String> = passages
        .iter()
        .map(|p| match &params.document_prompt_template {
            Some(prompt) => format!("{}{}", prompt, p.text),
            None => p.text.clone(),
        })
        .collect();

    let dimension = provider.dimension();
    let mut vectors = embed_corpus(provider, &texts, params, |done, total| {
        progress(BuildPhase::Embed, done, total)
    })?;
    debug_assert_eq!(vectors.len(), n * dimension);

    // ---- Graph -------------------------------------------------------
    let (graph_meta, compacted) = match params.backend {
        BackendKind::Hnsw => {
            let mut hnsw_params = params.hnsw.clone();
            hnsw_params.metric = params.metric;

            let source = SliceSource::new(&vectors, dimension);
            let mut graph = kombu_hnsw::build_graph(&source, &hnsw_params, &mut |done, total| {
                progress(BuildPhase::Graph, done, total)
            })?;

            let compacted = if params.compact {
                let (permuted, old_to_new) = kombu_hnsw::compact(graph);
                graph = permuted;
                apply_permutation(&mut passages, &mut vectors, dimension, &old_to_new);
                true
            } else {
                false
            };

            if let Some(threshold) = params.prune_threshold {
                let source = SliceSource::new(&vectors, dimension);
                kombu_hnsw::prune_edges(&mut graph, &source, params.metric, threshold);
            }

            kombu_hnsw::write_graph(&graph, &paths.graph)?;

            let meta = GraphMeta::Hnsw(HnswMeta {
                m: hnsw_params.m as u32,
                ef_construction: hnsw_params.ef_construction as u32,
                ef_search_default: params.ef_search_default as u32,
                entry_point: graph.entry_point,
                num_layers: graph.num_layers() as u32,
                layer_seed: hnsw_params.seed,
                prune_threshold: params.prune_threshold,
            });
            (meta, compacted)
        }
        BackendKind::Vamana => {
            let mut vamana_params = params.vamana.clone();
            vamana_params.metric = params.metric;

            let source = SliceSource::new(&vectors, dimension);
            let graph = kombu_vamana::build_graph(&source, &vamana_params, &mut |done, total| {
                progress(BuildPhase::Graph, done, total)
            })?;
            kombu_vamana::write_graph(&graph, &paths.graph)?;

            let meta = GraphMeta::Vamana(VamanaMeta {
                r: vamana_params.r as u32,
                l_build: vamana_params.l_build as u32,
                alpha: vamana_params.alpha,
                entry_point: graph.entry_point,
                seed: vamana_params.seed,
            });
            // BFS locality reordering is an HNSW concern; the Vamana layout
            // is already one aligned read per node.
            (meta, false)
        }
    };

    // ---- Finalize ----------------------------------------------------
    progress(BuildPhase::Finalize, 0, 1);

    let jsonl_tmp = paths.passages.with_extension("jsonl.tmp");
    let mut writer = PassageWriter::create(&jsonl_tmp, &paths.offsets)?;
    for passage in &passages {
        writer.append(passage)?;
    }
    writer.finish()?;
    std::fs::rename(&jsonl_tmp, &paths.passages)?;

    if !params.recompute {
        write_blob(&paths.embeddings, &vectors)?;
    } else if paths.embeddings.exists() {
        // A previous non-recompute build may have left a blob behind.
        std::fs::remove_file(&paths.embeddings)?;
    }

    let fingerprint = fingerprint(provider.model_id(), dimension, params, &passages);

    let manifest = Manifest {
        version: MANIFEST_VERSION,
        backend: params.backend,
        num_passages: n as u64,
        dimension: dimension as u32,
        metric: params.metric,
        model_id: provider.model_id().to_string(),
        normalized: provider.normalized(),
        recompute: params.recompute,
        compact: compacted,
        hnsw: match &graph_meta {
            GraphMeta::Hnsw(m) => Some(m.clone()),
            GraphMeta::Vamana(_) => None,
        },
        vamana: match &graph_meta {
            GraphMeta::Vamana(m) => Some(m.clone()),
            GraphMeta::Hnsw(_) => None,
        },
        files: FilesMeta {
            passages: file_name(&paths.passages),
            offsets: file_name(&paths.offsets),
            graph: file_name(&paths.graph),
            embeddings: (!params.recompute).then(|| file_name(&paths.embeddings)),
            bm25: None,
        },
        tokenizer: TOKENIZER_ID.to_string(),
        build_fingerprint: fingerprint,
        query_prompt_template: params.query_prompt_template.clone(),
        document_prompt_template: params.document_prompt_template.clone(),
        extra: serde_json::Map::new(),
    };
    manifest.save(&paths.meta)?;

    // The lexical sidecar is built lazily at query time; a stale one from a
    // previous corpus must not survive the rebuild.
    if paths.bm25.exists() {
        std::fs::remove_file(&paths.bm25)?;
    }

    progress(BuildPhase::Finalize, 1, 1);
    tracing::info!(passages = n, backend = ?params.backend, "index built");

    Ok(BuildReport {
        manifest,
        skipped_duplicates: skipped,
    })
}

enum GraphMeta {
    Hnsw(HnswMeta),
    Vamana(VamanaMeta),
}

/// Derived id for documents that arrive without one.
fn content_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex_string(&digest)
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Re-use passages of a valid existing index so rebuilds are idempotent and
/// appends keep prior documents. Anything unreadable means a fresh start;
/// a readable index built with a different model is refused rather than
/// silently re-embedded.
fn load_existing_passages(paths: &IndexPaths, model_id: &str) -> Result<Vec<Passage>> {
    let Ok(manifest) = Manifest::load(&paths.meta) else {
        return Ok(Vec::new());
    };
    if manifest.model_id != model_id {
        return Err(EngineError::ModelMismatch {
            expected: manifest.model_id,
            actual: model_id.to_string(),
        });
    }
    let Ok(store) = PassageStore::open(&paths.passages, &paths.offsets) else {
        return Ok(Vec::new());
    };
    match store.iter().collect::<kombu_passage::Result<Vec<_>>>() {
        Ok(passages) => {
            tracing::debug!(passages = passages.len(), "merging existing corpus");
            Ok(passages)
        }
        Err(_) => Ok(Vec::new()),
    }
}

/// Embed every text, preserving order, through a bounded worker pool.
fn embed_corpus(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    params: &BuildParams,
    mut on_progress: impl FnMut(usize, usize),
) -> Result<Vec<f32>> {
    let dimension = provider.dimension();
    let batch_size = params.batch_size.max(1);
    let batches: Vec<&[String]> = texts.chunks(batch_size).collect();
    let total = batches.len();

    let mut per_batch: Vec<Option<Vec<Vec<f32>>>> = vec![None; total];

    if params.workers <= 1 {
        for (idx, chunk) in batches.iter().enumerate() {
            let vectors = params
                .retry
                .encode_with_retry(provider, chunk, EncodeKind::Document)?;
            per_batch[idx] = Some(vectors);
            on_progress(idx + 1, total);
        }
    } else {
        // Bounded submission queue; feeding blocks when workers fall
        // behind, which is the build's backpressure.
        let (job_tx, job_rx) =
            crossbeam_channel::bounded::<(usize, Vec<String>)>(2 * params.workers);
        let (result_tx, result_rx) =
            crossbeam_channel::unbounded::<(usize, Result<Vec<Vec<f32>>>)>();

        std::thread::scope(|scope| {
            for _ in 0..params.workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let retry = params.retry;
                scope.spawn(move || {
                    for (idx, chunk) in job_rx.iter() {
                        let encoded =
                            retry.encode_with_retry(provider, &chunk, EncodeKind::Document);
                        if result_tx.send((idx, encoded)).is_err() {
                            return;
                        }
                    }
                });
            }
            drop(result_tx);

            for (idx, chunk) in batches.iter().enumerate() {
                if job_tx.send((idx, chunk.to_vec())).is_err() {
                    break;
                }
            }
            drop(job_tx);

            let mut first_error: Option<EngineError> = None;
            let mut collected = 0usize;
            for (idx, outcome) in result_rx.iter() {
                match outcome {
                    Ok(vectors) => per_batch[idx] = Some(vectors),
                    Err(err) if first_error.is_none() => first_error = Some(err),
                    Err(_) => {}
                }
                collected += 1;
                on_progress(collected, total);
            }
            match first_error {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })?;
    }

    let mut flat = Vec::with_capacity(texts.len() * dimension);
    for (idx, batch) in per_batch.into_iter().enumerate() {
        let batch = batch.ok_or_else(|| {
            EngineError::ProviderTransient(format!("embedding batch {} never completed", idx))
        })?;
        for vector in batch {
            flat.extend_from_slice(&vector);
        }
    }
    Ok(flat)
}

/// Reorder passages and the vector buffer by `old_to_new`.
fn apply_permutation(
    passages: &mut Vec<Passage>,
    vectors: &mut Vec<f32>,
    dimension: usize,
    old_to_new: &[u32],
) {
    let n = passages.len();
    let mut new_passages: Vec<Option<Passage>> = vec![None; n];
    let mut new_vectors = vec![0.0f32; vectors.len()];

    for old in 0..n {
        let new = old_to_new[old] as usize;
        new_passages[new] = Some(std::mem::replace(
            &mut passages[old],
            Passage::new("", ""),
        ));
        new_vectors[new * dimension..(new + 1) * dimension]
            .copy_from_slice(&vectors[old * dimension..(old + 1) * dimension]);
    }

    *passages = new_passages
        .into_iter()
        .map(|p| p.expect("permutation is total"))
        .collect();
    *vectors = new_vectors;
}

/// Write the embedding blob atomically.
fn write_blob(path: &Path, vectors: &[f32]) -> Result<()> {
    let tmp = path.with_extension("embeddings.tmp");
    {
        let mut f = File::create(&tmp)?;
        let mut buf = Vec::with_capacity(vectors.len() * 4);
        for v in vectors {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        f.write_all(&buf)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Content fingerprint: model, shape, parameters, and the sorted id set.
/// Equal fingerprints mean "same corpus, same recipe".
fn fingerprint(
    model_id: &str,
    dimension: usize,
    params: &BuildParams,
    passages: &[Passage],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(dimension.to_le_bytes());
    hasher.update(params.metric.as_str().as_bytes());
    hasher.update([0u8]);
    match params.backend {
        BackendKind::Hnsw => {
            hasher.update(b"hnsw");
            hasher.update(params.hnsw.m.to_le_bytes());
            hasher.update(params.hnsw.ef_construction.to_le_bytes());
            hasher.update(params.hnsw.seed.to_le_bytes());
        }
        BackendKind::Vamana => {
            hasher.update(b"vamana");
            hasher.update(params.vamana.r.to_le_bytes());
            hasher.update(params.vamana.l_build.to_le_bytes());
            hasher.update(params.vamana.alpha.to_le_bytes());
            hasher.update(params.vamana.seed.to_le_bytes());
        }
    }
    hasher.update([params.compact as u8, params.recompute as u8]);
    if let Some(t) = params.prune_threshold {
        hasher.update(t.to_le_bytes());
    }
    hasher.update((passages.len() as u64).to_le_bytes());

    let mut ids: Vec<&str> = passages.iter().map(|p| p.id.as_str()).collect();
    ids.sort_unstable();
    for id in ids {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
    }

    hex_string(&hasher.finalize())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_id_is_stable() {
        assert_eq!(content_id("hello"), content_id("hello"));
        assert_ne!(content_id("hello"), content_id("world"));
        assert_eq!(content_id("hello").len(), 64);
    }

    #[test]
    fn test_apply_permutation() {
        let mut passages = vec![
            Passage::new("a", "zero"),
            Passage::new("b", "one"),
            Passage::new("c", "two"),
        ];
        let mut vectors = vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0];
        // old 0 -> new 2, old 1 -> new 0, old 2 -> new 1
        apply_permutation(&mut passages, &mut vectors, 2, &[2, 0, 1]);

        assert_eq!(passages[0].id, "b");
        assert_eq!(passages[1].id, "c");
        assert_eq!(passages[2].id, "a");
        assert_eq!(vectors, vec![1.0, 1.0, 2.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_fingerprint_ignores_document_order() {
        let a = vec![Passage::new("x", "1"), Passage::new("y", "2")];
        let b = vec![Passage::new("y", "2"), Passage::new("x", "1")];
        let params = BuildParams::default();
        assert_eq!(
            fingerprint("m", 3, &params, &a),
            fingerprint("m", 3, &params, &b)
        );
    }

    #[test]
    fn test_fingerprint_sensitive_to_params() {
        let passages = vec![Passage::new("x", "1")];
        let base = BuildParams::default();
        let mut other = BuildParams::default();
        other.hnsw.m = base.hnsw.m + 1;
        assert_ne!(
            fingerprint("m", 3, &base, &passages),
            fingerprint("m", 3, &other, &passages)
        );
    }
}
