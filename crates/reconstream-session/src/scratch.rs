//! Per-session scratch storage.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Creates and removes the private directory each session stores images in.
///
/// Methods are blocking; async callers run them on the blocking pool.
pub trait ScratchStorage: Send + Sync {
    /// Create a fresh directory for `session_id`. Fails if it already exists.
    fn create(&self, session_id: &str) -> io::Result<PathBuf>;

    /// Remove a directory previously returned by [`create`](Self::create).
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Scratch directories under a common root: `{root}/session_{id}`.
#[derive(Debug, Clone)]
pub struct DirScratchStorage {
    root: PathBuf,
}

impl DirScratchStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ScratchStorage for DirScratchStorage {
    fn create(&self, session_id: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let dir = self.root.join(format!("session_{}", session_id));
        // Must not exist yet: directories are never shared between sessions.
        fs::create_dir(&dir)?;
        Ok(dir)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_remove() {
        let root = TempDir::new().unwrap();
        let storage = DirScratchStorage::new(root.path().join("scratch"));

        let dir = storage.create("abc").unwrap();
        assert!(dir.is_dir());
        assert!(dir.ends_with("session_abc"));

        storage.remove(&dir).unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn test_directories_are_exclusive() {
        let root = TempDir::new().unwrap();
        let storage = DirScratchStorage::new(root.path());
        storage.create("same").unwrap();
        assert!(storage.create("same").is_err());
    }
}
