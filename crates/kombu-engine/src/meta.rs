//! Index manifest.
//!
//! A small, human-readable JSON descriptor tying the index directory's
//! artifacts together. Unknown keys survive a read-modify-write cycle via
//! the flattened `extra` map, so newer tools can annotate a manifest
//! without older ones destroying their keys.

use crate::{EngineError, Result};
use kombu_vector::Metric;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Manifest schema version written by this crate.
pub const MANIFEST_VERSION: u32 = 1;

/// Which graph backend an index was built with. Fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Hnsw,
    Vamana,
}

/// HNSW section of the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HnswMeta {
    pub m: u32,
    pub ef_construction: u32,
    pub ef_search_default: u32,
    pub entry_point: u32,
    pub num_layers: u32,
    pub layer_seed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prune_threshold: Option<f32>,
}

/// Vamana section of the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VamanaMeta {
    pub r: u32,
    pub l_build: u32,
    pub alpha: f32,
    pub entry_point: u32,
    pub seed: u64,
}

/// File names of the index artifacts, relative to the index directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesMeta {
    pub passages: String,
    pub offsets: String,
    pub graph: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bm25: Option<String>,
}

/// The index manifest, `<name>.meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub backend: BackendKind,
    pub num_passages: u64,
    pub dimension: u32,
    pub metric: Metric,
    pub model_id: String,
    pub normalized: bool,
    pub recompute: bool,
    pub compact: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hnsw: Option<HnswMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vamana: Option<VamanaMeta>,
    pub files: FilesMeta,
    pub tokenizer: String,
    pub build_fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_prompt_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_prompt_template: Option<String>,
    /// Keys this schema does not recognize, preserved on rewrite.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Manifest {
    /// Load a manifest, validating version and internal consistency.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let manifest: Manifest = serde_json::from_str(&content)
            .map_err(|e| EngineError::Corrupt(format!("manifest does not parse: {}", e)))?;

        if manifest.version != MANIFEST_VERSION {
            return Err(EngineError::Corrupt(format!(
                "unsupported manifest version: {}",
                manifest.version
            )));
        }
        match manifest.backend {
            BackendKind::Hnsw if manifest.hnsw.is_none() => {
                return Err(EngineError::Corrupt("hnsw manifest lacks hnsw section".into()));
            }
            BackendKind::Vamana if manifest.vamana.is_none() => {
                return Err(EngineError::Corrupt("vamana manifest lacks vamana section".into()));
            }
            _ => {}
        }
        if !manifest.recompute && manifest.files.embeddings.is_none() {
            return Err(EngineError::Corrupt(
                "non-recompute manifest names no embedding blob".into(),
            ));
        }
        Ok(manifest)
    }

    /// Write atomically (temp + rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::InvalidInput(format!("unserializable manifest: {}", e)))?;

        let path = path.as_ref();
        let tmp = path.with_extension("json.tmp");
        {
            let mut f = File::create(&tmp)?;
            f.write_all(content.as_bytes())?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Canonical artifact names for an index called `name`.
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub meta: std::path::PathBuf,
    pub passages: std::path::PathBuf,
    pub offsets: std::path::PathBuf,
    pub graph: std::path::PathBuf,
    pub embeddings: std::path::PathBuf,
    pub bm25: std::path::PathBuf,
    pub lock: std::path::PathBuf,
}

impl IndexPaths {
    pub fn new(dir: impl AsRef<Path>, name: &str) -> Self {
        let dir = dir.as_ref();
        Self {
            meta: dir.join(format!("{}.meta.json", name)),
            passages: dir.join(format!("{}.passages.jsonl", name)),
            offsets: dir.join(format!("{}.passages.idx", name)),
            graph: dir.join(format!("{}.graph", name)),
            embeddings: dir.join(format!("{}.embeddings", name)),
            bm25: dir.join(format!("{}.bm25", name)),
            lock: dir.join(format!("{}.lock", name)),
        }
    }
}
