//! Key/value persistence behind the local store.
//!
//! The store only needs "read a document by key" and "replace a document by
//! key". Anything that can do both (a directory of JSON files, an embedded
//! KV store, a database table) can back it.

use anyhow::{anyhow, Context, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub trait StoreRepository: Send + Sync {
    /// Raw payload stored under `key`, or `None` if nothing was ever saved.
    fn load(&self, key: &str) -> Result<Option<String>>;

    /// Replace the payload stored under `key`.
    fn save(&self, key: &str, payload: &str) -> Result<()>;
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryRepository {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with pre-existing payloads (e.g. legacy documents).
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: RwLock::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    pub fn insert(&self, key: &str, payload: &str) {
        self.entries
            .write()
            .insert(key.to_string(), payload.to_string());
    }
}

impl StoreRepository for MemoryRepository {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key))
    }

    fn save(&self, key: &str, payload: &str) -> Result<()> {
        self.insert(key, payload);
        Ok(())
    }
}

// ============================================================================
// Directory of JSON files
// ============================================================================

/// One `<key>.json` file per key. Saves go through a temp file + rename so a
/// crash never leaves a half-written document behind.
#[derive(Debug, Clone)]
pub struct FileRepository {
    dir: PathBuf,
}

impl FileRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(anyhow!("invalid storage key `{key}`"));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl StoreRepository for FileRepository {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Some(contents))
    }

    fn save(&self, key: &str, payload: &str) -> Result<()> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        fs::write(&tmp, payload).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| {
            format!("failed to move {} -> {}", tmp.display(), path.display())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_repository_roundtrip() {
        let dir = tempdir().unwrap();
        let repo = FileRepository::new(dir.path().join("nested"));
        assert!(repo.load("doc").unwrap().is_none());
        repo.save("doc", "{\"a\":1}").unwrap();
        assert_eq!(repo.load("doc").unwrap().as_deref(), Some("{\"a\":1}"));
        repo.save("doc", "{}").unwrap();
        assert_eq!(repo.load("doc").unwrap().as_deref(), Some("{}"));
        assert!(!dir.path().join("nested/.doc.json.tmp").exists());
    }

    #[test]
    fn test_file_repository_rejects_path_keys() {
        let dir = tempdir().unwrap();
        let repo = FileRepository::new(dir.path());
        assert!(repo.save("../escape", "{}").is_err());
        assert!(repo.load(".hidden").is_err());
        assert!(repo.load("").is_err());
    }

    #[test]
    fn test_memory_repository_seeded() {
        let repo = MemoryRepository::with_entries([("k", "v")]);
        assert_eq!(repo.load("k").unwrap().as_deref(), Some("v"));
        assert!(repo.load("other").unwrap().is_none());
    }
}
