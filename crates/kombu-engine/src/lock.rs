//! Build lock and stale-temp cleanup.

use crate::{EngineError, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Locks held longer than this are presumed abandoned by a dead builder.
const STALE_LOCK_AGE: Duration = Duration::from_secs(60 * 60);

/// Temp files older than this are garbage from a crashed build.
const STALE_TEMP_AGE: Duration = Duration::from_secs(60 * 60);

/// Exclusive-create lock file guarding a build; removed on drop.
pub struct DirLock {
    path: PathBuf,
}

impl DirLock {
    /// Acquire the lock, breaking it if its holder looks dead.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Ok(meta) = std::fs::metadata(&path) {
            let stale = meta
                .modified()
                .ok()
                .and_then(|m| m.elapsed().ok())
                .is_some_and(|age| age > STALE_LOCK_AGE);
            if stale {
                tracing::warn!(lock = %path.display(), "breaking stale build lock");
                std::fs::remove_file(&path)?;
            }
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    EngineError::InvalidInput(format!(
                        "another build holds the lock at {}",
                        path.display()
                    ))
                } else {
                    EngineError::Io(e)
                }
            })?;
        let _ = writeln!(file, "{}", std::process::id());

        Ok(Self { path })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), error = %e, "failed to remove build lock");
        }
    }
}

/// Remove `*.tmp` files in `dir` older than the stale age. Called at the
/// start of every build so crashed builds cannot pile up garbage.
pub fn gc_stale_temps(dir: impl AsRef<Path>) -> Result<usize> {
    let mut removed = 0usize;
    let entries = match std::fs::read_dir(dir.as_ref()) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let is_tmp = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("tmp"));
        if !is_tmp {
            continue;
        }
        let old = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|m| m.elapsed().ok())
            .is_some_and(|age| age > STALE_TEMP_AGE);
        if old {
            tracing::debug!(path = %path.display(), "removing stale temp file");
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lock_excludes_second_holder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.lock");

        let _held = DirLock::acquire(&path).unwrap();
        assert!(matches!(
            DirLock::acquire(&path),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.lock");

        {
            let _held = DirLock::acquire(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
        let _again = DirLock::acquire(&path).unwrap();
    }

    #[test]
    fn test_gc_ignores_fresh_temps() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("index.graph.tmp"), b"x").unwrap();
        std::fs::write(dir.path().join("index.graph"), b"x").unwrap();

        let removed = gc_stale_temps(dir.path()).unwrap();
        assert_eq!(removed, 0);
        assert!(dir.path().join("index.graph.tmp").exists());
    }

    #[test]
    fn test_gc_missing_dir_is_noop() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("nope");
        assert_eq!(gc_stale_temps(&gone).unwrap(), 0);
    }
}
