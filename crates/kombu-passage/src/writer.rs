//! Append-side of the passage store.

use crate::offsets::OffsetTable;
use crate::{Passage, PassageError, Result};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes `.passages.jsonl` and, on finish, the `.passages.idx` offset
/// table.
///
/// The jsonl is written through a buffered writer as passages arrive; the
/// offset table is only materialized by [`PassageWriter::finish`], written to
/// a temp file and renamed into place so a crash mid-build never leaves a
/// table that disagrees with the jsonl.
pub struct PassageWriter {
    jsonl: BufWriter<File>,
    idx_path: PathBuf,
    offsets: Vec<u64>,
    bytes_written: u64,
    seen_ids: HashSet<String>,
}

impl PassageWriter {
    /// Create a writer over fresh files. Existing files are truncated.
    pub fn create(jsonl_path: impl AsRef<Path>, idx_path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(jsonl_path.as_ref())?;
        Ok(Self {
            jsonl: BufWriter::new(file),
            idx_path: idx_path.as_ref().to_path_buf(),
            offsets: Vec::new(),
            bytes_written: 0,
            seen_ids: HashSet::new(),
        })
    }

    /// Append one passage; returns its node index.
    ///
    /// Rejects ids already written to this store.
    pub fn append(&mut self, passage: &Passage) -> Result<u32> {
        if self.seen_ids.contains(&passage.id) {
            return Err(PassageError::DuplicateId(passage.id.clone()));
        }

        let line = serde_json::to_string(passage)
            .map_err(|e| PassageError::Corrupt(format!("unserializable passage: {}", e)))?;

        let node = self.offsets.len() as u32;
        self.offsets.push(self.bytes_written);

        self.jsonl.write_all(line.as_bytes())?;
        self.jsonl.write_all(b"\n")?;
        self.bytes_written += line.len() as u64 + 1;

        self.seen_ids.insert(passage.id.clone());
        Ok(node)
    }

    /// Number of passages appended so far.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Whether an id was already appended.
    pub fn contains(&self, id: &str) -> bool {
        self.seen_ids.contains(id)
    }

    /// Flush the jsonl and atomically write the offset table.
    pub fn finish(mut self) -> Result<()> {
        self.jsonl.flush()?;
        self.jsonl.get_ref().sync_all()?;

        let table = OffsetTable::new(std::mem::take(&mut self.offsets), self.bytes_written);

        let tmp = self.idx_path.with_extension("idx.tmp");
        {
            let mut f = File::create(&tmp)?;
            f.write_all(&table.encode())?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp, &self.idx_path)?;

        tracing::debug!(
            passages = table.len(),
            bytes = table.sentinel(),
            "passage store finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_append_assigns_dense_nodes() {
        let dir = tempdir().unwrap();
        let mut w = PassageWriter::create(
            dir.path().join("x.passages.jsonl"),
            dir.path().join("x.passages.idx"),
        )
        .unwrap();

        assert_eq!(w.append(&Passage::new("a", "first")).unwrap(), 0);
        assert_eq!(w.append(&Passage::new("b", "second")).unwrap(), 1);
        assert_eq!(w.len(), 2);
        w.finish().unwrap();

        assert!(dir.path().join("x.passages.idx").exists());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let dir = tempdir().unwrap();
        let mut w = PassageWriter::create(
            dir.path().join("x.passages.jsonl"),
            dir.path().join("x.passages.idx"),
        )
        .unwrap();

        w.append(&Passage::new("a", "first")).unwrap();
        assert!(matches!(
            w.append(&Passage::new("a", "again")),
            Err(PassageError::DuplicateId(_))
        ));
    }
}
