//! BM25 postings index and its file format.
//!
//! Layout (little-endian):
//! ```text
//! magic(4) = "LBM1" | version(u32) | doc_count(u64) | total_len(u64)
//! | doc_len[doc_count](u32) | term_count(u64)
//! | per term, bytewise-sorted: len(u16) | utf8 | df(u32) | (doc u32, tf u32)[df]
//! | crc32c(u32) over everything preceding it
//! ```
//!
//! Terms are written in sorted order so identical corpora persist to
//! identical files.

use crate::tokenizer::tokenize;
use crate::{Bm25Params, LexicalError, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Sidecar file magic, "LBM1".
pub const BM25_MAGIC: [u8; 4] = *b"LBM1";

/// Current sidecar format version.
pub const BM25_VERSION: u32 = 1;

/// In-memory BM25 index over the passage corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct Bm25Index {
    doc_lens: Vec<u32>,
    total_len: u64,
    /// term -> postings (doc, term frequency), docs ascending.
    postings: BTreeMap<String, Vec<(u32, u32)>>,
}

impl Bm25Index {
    /// Build from `(text)` in node order.
    pub fn build<'a>(texts: impl Iterator<Item = &'a str>) -> Self {
        let mut doc_lens = Vec::new();
        let mut total_len = 0u64;
        let mut postings: BTreeMap<String, Vec<(u32, u32)>> = BTreeMap::new();

        for (doc, text) in texts.enumerate() {
            let terms = tokenize(text);
            doc_lens.push(terms.len() as u32);
            total_len += terms.len() as u64;

            let mut tf: HashMap<String, u32> = HashMap::new();
            for term in terms {
                *tf.entry(term).or_insert(0) += 1;
            }
            for (term, count) in tf {
                postings.entry(term).or_default().push((doc as u32, count));
            }
        }

        // HashMap iteration scrambled the doc order within each term.
        for list in postings.values_mut() {
            list.sort_unstable();
        }

        tracing::debug!(
            docs = doc_lens.len(),
            terms = postings.len(),
            "bm25 sidecar built"
        );

        Self {
            doc_lens,
            total_len,
            postings,
        }
    }

    /// Number of indexed documents.
    pub fn doc_count(&self) -> usize {
        self.doc_lens.len()
    }

    /// Number of distinct terms.
    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    fn avg_doc_len(&self) -> f32 {
        if self.doc_lens.is_empty() {
            0.0
        } else {
            self.total_len as f32 / self.doc_lens.len() as f32
        }
    }

    fn idf(&self, df: usize) -> f32 {
        let n = self.doc_count() as f32;
        let df = df as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// BM25 scores of `query` for each of `candidates`, parallel to the
    /// input slice. Documents sharing no query term score 0.
    pub fn scores(&self, query: &str, candidates: &[u32], params: Bm25Params) -> Vec<f32> {
        let terms = tokenize(query);
        if terms.is_empty() || candidates.is_empty() {
            return vec![0.0; candidates.len()];
        }

        let avgdl = self.avg_doc_len().max(f32::EPSILON);
        let wanted: HashMap<u32, usize> = candidates
            .iter()
            .enumerate()
            .map(|(i, &doc)| (doc, i))
            .collect();
        let mut out = vec![0.0f32; candidates.len()];

        // Dedup query terms; repeating a term in the query does not multiply
        // its contribution.
        let mut seen = std::collections::HashSet::new();
        for term in terms {
            if !seen.insert(term.clone()) {
                continue;
            }
            let Some(list) = self.postings.get(&term) else {
                continue;
            };
            let idf = self.idf(list.len());
            for &(doc, tf) in list {
                let Some(&slot) = wanted.get(&doc) else {
                    continue;
                };
                let dl = self.doc_lens[doc as usize] as f32;
                let tf = tf as f32;
                let denom = tf + params.k1 * (1.0 - params.b + params.b * dl / avgdl);
                out[slot] += idf * tf * (params.k1 + 1.0) / denom;
            }
        }
        out
    }

    /// Serialize to `path`, atomically (temp + rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut buf = BytesMut::with_capacity(64 + self.doc_lens.len() * 4);
        buf.put_slice(&BM25_MAGIC);
        buf.put_u32_le(BM25_VERSION);
        buf.put_u64_le(self.doc_lens.len() as u64);
        buf.put_u64_le(self.total_len);
        for &len in &self.doc_lens {
            buf.put_u32_le(len);
        }
        buf.put_u64_le(self.postings.len() as u64);
        for (term, list) in &self.postings {
            let bytes = term.as_bytes();
            buf.put_u16_le(bytes.len() as u16);
            buf.put_slice(bytes);
            buf.put_u32_le(list.len() as u32);
            for &(doc, tf) in list {
                buf.put_u32_le(doc);
                buf.put_u32_le(tf);
            }
        }

        let crc = crc32c::crc32c(&buf);
        buf.put_u32_le(crc);

        let path = path.as_ref();
        let tmp = path.with_extension("bm25.tmp");
        {
            let mut f = File::create(&tmp)?;
            f.write_all(&buf)?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load and validate a sidecar file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        if bytes.len() < 28 {
            return Err(LexicalError::Corrupt(format!(
                "sidecar truncated: {} bytes",
                bytes.len()
            )));
        }

        let body = &bytes[..bytes.len() - 4];
        let expected = u32::from_le_bytes(
            bytes[bytes.len() - 4..].try_into().expect("4-byte slice"),
        );
        let actual = crc32c::crc32c(body);
        if expected != actual {
            return Err(LexicalError::Corrupt(format!(
                "sidecar CRC mismatch: expected {:#x}, got {:#x}",
                expected, actual
            )));
        }

        let mut buf = body;
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != BM25_MAGIC {
            return Err(LexicalError::Corrupt(format!("bad sidecar magic: {:02x?}", magic)));
        }
        let version = buf.get_u32_le();
        if version != BM25_VERSION {
            return Err(LexicalError::Corrupt(format!(
                "unsupported sidecar version: {}",
                version
            )));
        }

        let doc_count = buf.get_u64_le() as usize;
        let total_len = buf.get_u64_le();
        if buf.remaining() < doc_count * 4 + 8 {
            return Err(LexicalError::Corrupt("sidecar truncated in doc lengths".into()));
        }
        let mut doc_lens = Vec::with_capacity(doc_count);
        for _ in 0..doc_count {
            doc_lens.push(buf.get_u32_le());
        }

        let term_count = buf.get_u64_le() as usize;
        let mut postings = BTreeMap::new();
        for _ in 0..term_count {
            if buf.remaining() < 2 {
                return Err(LexicalError::Corrupt("sidecar truncated in term table".into()));
            }
            let len = buf.get_u16_le() as usize;
            if buf.remaining() < len + 4 {
                return Err(LexicalError::Corrupt("sidecar truncated in term bytes".into()));
            }
            let mut term_bytes = vec![0u8; len];
            buf.copy_to_slice(&mut term_bytes);
            let term = String::from_utf8(term_bytes)
                .map_err(|e| LexicalError::Corrupt(format!("term is not utf-8: {}", e)))?;

            let df = buf.get_u32_le() as usize;
            if buf.remaining() < df * 8 {
                return Err(LexicalError::Corrupt("sidecar truncated in postings".into()));
            }
            let mut list = Vec::with_capacity(df);
            for _ in 0..df {
                let doc = buf.get_u32_le();
                let tf = buf.get_u32_le();
                if doc as usize >= doc_count {
                    return Err(LexicalError::Corrupt(format!(
                        "posting for term {:?} refers to doc {} of {}",
                        term, doc, doc_count
                    )));
                }
                list.push((doc, tf));
            }
            postings.insert(term, list);
        }

        Ok(Self {
            doc_lens,
            total_len,
            postings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CORPUS: [&str; 3] = [
        "the cat sits on the mat",
        "dogs bark at night",
        "the mat is blue",
    ];

    fn build() -> Bm25Index {
        Bm25Index::build(CORPUS.iter().copied())
    }

    #[test]
    fn test_counts() {
        let idx = build();
        assert_eq!(idx.doc_count(), 3);
        // the, cat, sits, on, mat, dogs, bark, at, night, is, blue
        assert_eq!(idx.term_count(), 11);
    }

    #[test]
    fn test_term_hits_rank_above_misses() {
        let idx = build();
        let scores = idx.scores("mat", &[0, 1, 2], Bm25Params::default());
        assert!(scores[0] > 0.0);
        assert_eq!(scores[1], 0.0);
        assert!(scores[2] > 0.0);
        // Doc 2 is shorter, so its "mat" weighs more.
        assert!(scores[2] > scores[0]);
    }

    #[test]
    fn test_rare_term_outweighs_common() {
        let idx = build();
        // "the" appears in two docs, "cat" in one; for doc 0 the rare term
        // contributes more.
        let the = idx.scores("the", &[0], Bm25Params::default())[0];
        let cat = idx.scores("cat", &[0], Bm25Params::default())[0];
        assert!(cat > the);
    }

    #[test]
    fn test_empty_query_scores_zero() {
        let idx = build();
        assert_eq!(idx.scores("", &[0, 1, 2], Bm25Params::default()), vec![0.0; 3]);
    }

    #[test]
    fn test_candidate_subset() {
        let idx = build();
        let scores = idx.scores("mat", &[1, 2], Bm25Params::default());
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0], 0.0);
        assert!(scores[1] > 0.0);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let idx = build();
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.bm25");
        idx.save(&path).unwrap();

        let loaded = Bm25Index::load(&path).unwrap();
        assert_eq!(idx, loaded);
    }

    #[test]
    fn test_corrupt_sidecar_refused() {
        let idx = build();
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.bm25");
        idx.save(&path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(Bm25Index::load(&path), Err(LexicalError::Corrupt(_))));
    }

    #[test]
    fn test_deterministic_bytes() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.bm25");
        let b = dir.path().join("b.bm25");
        build().save(&a).unwrap();
        build().save(&b).unwrap();
        assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
    }
}
