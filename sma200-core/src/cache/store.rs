//! Key/value blob stores backing the expiring cache.
//!
//! The cache only needs existence checks, whole-blob reads and writes,
//! deletes, and a listing for status reports.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait BlobStore: Send + Sync {
    fn exists(&self, key: &str) -> Result<bool>;

    fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Create or overwrite a blob.
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Remove a blob. Absent keys are not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// All keys currently stored, sorted.
    fn list(&self) -> Result<Vec<String>>;
}

/// Blobs as flat files under a directory.
///
/// Each write goes to `{key}.tmp` and is renamed into place, so a single
/// blob is never observed half-written.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || key.contains(['/', '\\'])
            || key == "."
            || key == ".."
            || key.ends_with(".tmp")
        {
            return Err(Error::Cache(format!("invalid blob key '{key}'")));
        }
        Ok(self.root.join(key))
    }
}

impl BlobStore for FsBlobStore {
    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.path(key)?.is_file())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path(key)?;
        fs::read(&path).map_err(|e| Error::Cache(format!("read {}: {e}", path.display())))
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key)?;
        fs::create_dir_all(&self.root)
            .map_err(|e| Error::Cache(format!("failed to create dir: {e}")))?;

        let tmp_path = self.root.join(format!("{key}.tmp"));
        fs::write(&tmp_path, bytes)
            .map_err(|e| Error::Cache(format!("write {}: {e}", tmp_path.display())))?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            Error::Cache(format!("atomic rename failed: {e}"))
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Cache(format!("delete {}: {e}", path.display()))),
        }
    }

    fn list(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.root)
            .map_err(|e| Error::Cache(format!("read dir: {e}")))?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::Cache(format!("dir entry: {e}")))?;
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".tmp") {
                continue;
            }
            keys.push(name);
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-process store, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn blobs(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl BlobStore for MemoryBlobStore {
    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.blobs().contains_key(key))
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.blobs()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::Cache(format!("no blob '{key}'")))
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.blobs().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.blobs().remove(key);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.blobs().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_store_write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path().join("cache"));

        assert!(!store.exists("a.bin").unwrap());
        store.write("a.bin", b"hello").unwrap();
        assert!(store.exists("a.bin").unwrap());
        assert_eq!(store.read("a.bin").unwrap(), b"hello");

        store.write("a.bin", b"again").unwrap();
        assert_eq!(store.read("a.bin").unwrap(), b"again");
        assert_eq!(store.list().unwrap(), vec!["a.bin".to_string()]);

        store.delete("a.bin").unwrap();
        assert!(!store.exists("a.bin").unwrap());
        // Second delete is a no-op.
        store.delete("a.bin").unwrap();
    }

    #[test]
    fn fs_store_list_on_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path().join("never_created"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn fs_store_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(store.write("../escape", b"x").is_err());
        assert!(store.write("", b"x").is_err());
        assert!(store.read("a/b").is_err());
    }

    #[test]
    fn memory_store_delete_absent_is_noop() {
        let store = MemoryBlobStore::new();
        store.delete("missing").unwrap();
        assert!(store.list().unwrap().is_empty());
    }
}
