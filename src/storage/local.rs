//! Local filesystem seed documents.
//!
//! Each adapter may have a hand-maintained `{seed_dir}/{source_id}.json`
//! shaped like its remote fetch result. It is merged with the remote data
//! before filtering.

use std::path::PathBuf;

use serde::de::DeserializeOwned;

use crate::error::{AppError, Result};

/// Reader for per-source seed documents.
#[derive(Debug, Clone)]
pub struct SeedStore {
    root_dir: PathBuf,
}

impl SeedStore {
    /// Create a new SeedStore rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load the seed document for a source, if one exists.
    pub async fn load<T: DeserializeOwned>(&self, source_id: i64) -> Result<Option<T>> {
        let key = format!("{}.json", source_id);
        let doc = self.read_json(&key).await?;
        if doc.is_some() {
            log::debug!("Loaded local seed {}", self.path(&key).display());
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_seed_is_none() {
        let temp = TempDir::new().unwrap();
        let store = SeedStore::new(temp.path());

        let doc: Option<Value> = store.load(42).await.unwrap();
        assert!(doc.is_none());
    }

    #[tokio::test]
    async fn test_load_seed_document() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("7.json"), r#"{"1.16":[{"id":1}]}"#).unwrap();
        let store = SeedStore::new(temp.path());

        let doc: Value = store.load(7).await.unwrap().unwrap();
        assert_eq!(doc["1.16"][0]["id"], 1);
    }

    #[tokio::test]
    async fn test_malformed_seed_is_error() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("3.json"), "not json").unwrap();
        let store = SeedStore::new(temp.path());

        let result: Result<Option<Value>> = store.load(3).await;
        assert!(matches!(result, Err(AppError::Json(_))));
    }
}
