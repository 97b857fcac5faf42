//! # Document Stores
//!
//! Byte-level persistence for serialized documents, keyed by document key.
//! Stores never look inside the record; version checks and migrations are
//! the codec's job.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{EditorError, EditorResult, SerializedDocument};

/// Persistence backend for serialized documents
pub trait DocumentStore {
    fn save(&mut self, key: &str, document: &SerializedDocument) -> EditorResult<()>;

    /// Raw encoded record; `NotFound` if the key was never saved
    fn load(&self, key: &str) -> EditorResult<String>;

    fn exists(&self, key: &str) -> bool;

    /// Returns false if there was nothing to delete
    fn delete(&mut self, key: &str) -> EditorResult<bool>;

    /// Stored keys in sorted order
    fn keys(&self) -> EditorResult<Vec<String>>;
}

/// Directory of `<key>.json` files
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> EditorResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> EditorResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(format!("{}.json", key)))
    }
}

impl DocumentStore for FileStore {
    fn save(&mut self, key: &str, document: &SerializedDocument) -> EditorResult<()> {
        let path = self.path_for(key)?;
        let json = serde_json::to_string_pretty(document)?;

        // Write next to the target, then rename over it
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, json)?;
        fs::rename(&staging, &path)?;

        debug!(key, path = %path.display(), "Document saved");
        Ok(())
    }

    fn load(&self, key: &str) -> EditorResult<String> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Err(EditorError::NotFound(format!("document '{}'", key)));
        }
        Ok(fs::read_to_string(path)?)
    }

    fn exists(&self, key: &str) -> bool {
        self.path_for(key).map(|p| p.exists()).unwrap_or(false)
    }

    fn delete(&mut self, key: &str) -> EditorResult<bool> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    fn keys(&self) -> EditorResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-memory store for tests and scratch sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw bytes as-is (e.g. a record written by an older build)
    pub fn insert_raw(&mut self, key: impl Into<String>, json: impl Into<String>) {
        self.records.insert(key.into(), json.into());
    }
}

impl DocumentStore for MemoryStore {
    fn save(&mut self, key: &str, document: &SerializedDocument) -> EditorResult<()> {
        validate_key(key)?;
        self.records
            .insert(key.to_string(), serde_json::to_string(document)?);
        Ok(())
    }

    fn load(&self, key: &str) -> EditorResult<String> {
        self.records
            .get(key)
            .cloned()
            .ok_or_else(|| EditorError::NotFound(format!("document '{}'", key)))
    }

    fn exists(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    fn delete(&mut self, key: &str) -> EditorResult<bool> {
        Ok(self.records.remove(key).is_some())
    }

    fn keys(&self) -> EditorResult<Vec<String>> {
        Ok(self.records.keys().cloned().collect())
    }
}

/// Keys become file names, so they are restricted to a portable subset
fn validate_key(key: &str) -> EditorResult<()> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(EditorError::Validation(format!(
            "invalid document key '{}'",
            key
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SerializedNode;
    use tempfile::TempDir;

    fn record() -> SerializedDocument {
        SerializedDocument {
            version: 3,
            root: SerializedNode::new("root", "document"),
        }
    }

    #[test]
    fn test_file_store_save_load_delete() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStore::open(dir.path().join("docs")).unwrap();

        store.save("plan-a", &record()).unwrap();
        assert!(store.exists("plan-a"));
        assert!(dir.path().join("docs/plan-a.json").exists());

        let json = store.load("plan-a").unwrap();
        let back: SerializedDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record());

        assert_eq!(store.keys().unwrap(), vec!["plan-a".to_string()]);
        assert!(store.delete("plan-a").unwrap());
        assert!(!store.delete("plan-a").unwrap());
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(store.load("nope"), Err(EditorError::NotFound(_))));
        assert!(matches!(
            MemoryStore::new().load("nope"),
            Err(EditorError::NotFound(_))
        ));
    }

    #[test]
    fn test_path_like_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();

        for key in ["../escape", "a/b", "", ".hidden"] {
            assert!(
                matches!(store.save(key, &record()), Err(EditorError::Validation(_))),
                "key {:?} should be rejected",
                key
            );
        }
    }

    #[test]
    fn test_memory_store_keys_sorted() {
        let mut store = MemoryStore::new();
        store.save("b", &record()).unwrap();
        store.save("a", &record()).unwrap();
        assert_eq!(store.keys().unwrap(), vec!["a", "b"]);
    }
}
