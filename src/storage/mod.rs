//! Whole-document persistence for the cache and route tables
//!
//! Both tables are stored as a single JSON document each, read once at
//! startup and rewritten in full on every mutation. A missing key is
//! reported as `Ok(None)` so callers can start empty.

mod s3;

pub use s3::{S3Config, S3Store};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::{Error, Result};

/// Key-addressed store of whole documents
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document; `Ok(None)` when the key does not exist
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Replace a document
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()>;
}

/// In-process store, used for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<String, Vec<u8>>>,
    writes: Mutex<usize>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document without counting it as a write
    pub fn insert(&self, key: &str, body: impl Into<Vec<u8>>) {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), body.into());
    }

    /// Read a document back synchronously
    #[must_use]
    pub fn document(&self, key: &str) -> Option<Vec<u8>> {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Number of `put` calls observed
    #[must_use]
    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.document(key))
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        self.insert(key, body);
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}

/// Store backed by a local directory, one file per key
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `dir` (created lazily on first write)
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(Error::Storage(format!("invalid document key: {key:?}")));
        }
        Ok(self.dir.join(key))
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        // Write-then-rename so readers never see a truncated document
        let tmp = self.dir.join(format!(".{key}.{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// Parse a stored JSON document, treating corruption as absence
///
/// Returns `None` for a missing document and for one that fails to parse;
/// the latter is logged so the operator can see why the table was reset.
pub fn decode_document<T: serde::de::DeserializeOwned>(key: &str, raw: Option<&[u8]>) -> Option<T> {
    let bytes = raw?;
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!(key, error = %e, "stored document is corrupt, starting empty");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get("routes.json").await.unwrap().is_none());

        store.put("routes.json", b"{}".to_vec()).await.unwrap();
        assert_eq!(store.get("routes.json").await.unwrap().unwrap(), b"{}");
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_file_store_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.get("tool_cache.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));

        store.put("tool_cache.json", b"one".to_vec()).await.unwrap();
        store.put("tool_cache.json", b"two".to_vec()).await.unwrap();

        assert_eq!(store.get("tool_cache.json").await.unwrap().unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.get("../escape.json").await.is_err());
        assert!(store.put("a/b.json", Vec::new()).await.is_err());
    }

    #[test]
    fn test_decode_document_corrupt_is_none() {
        let parsed: Option<HashMap<String, Vec<String>>> =
            decode_document("routes.json", Some(b"{not json"));
        assert!(parsed.is_none());

        let parsed: Option<HashMap<String, Vec<String>>> =
            decode_document("routes.json", Some(br#"{"media": ["musik stoppen"]}"#));
        assert_eq!(parsed.unwrap()["media"], vec!["musik stoppen"]);
    }
}
