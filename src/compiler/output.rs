//! Artifact output
//!
//! Every generated file goes through a temporary file in its destination
//! directory and is renamed into place, so an interrupted run never leaves a
//! partially written artifact behind.

use crate::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// Create the output directory if needed
pub fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))
}

/// Write `contents` to `path` atomically
pub fn write_atomic(path: &Path, contents: &str) -> Result<PathBuf> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
    tmp.write_all(contents.as_bytes())
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| Error::io(path, e))?;
    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;

    info!(path = %path.display(), bytes = contents.len(), "wrote artifact");
    Ok(path.to_path_buf())
}

/// Remove an artifact written earlier in a run that failed later
pub fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "could not remove partial artifact");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.c");
        std::fs::write(&path, "old").unwrap();
        write_atomic(&path, "new contents").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new contents");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.c");
        assert!(matches!(write_atomic(&path, "x"), Err(Error::Io { .. })));
    }

    #[test]
    fn test_discard_removes_file_and_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_atomic(&dir.path().join("B.ebpf.c"), "int x;").unwrap();
        discard(&path);
        assert!(!path.exists());
        discard(&path);
    }
}
