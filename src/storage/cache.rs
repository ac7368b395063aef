//! Adapter cache service.
//!
//! Entries live in a durable [`CacheStore`] and are mirrored in memory for
//! the lifetime of the process. Keys are scoped per source as
//! `{source_id}_{key}`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::storage::CacheStore;

/// Process-wide cache shared by all adapters.
#[derive(Clone)]
pub struct CacheService {
    store: Arc<dyn CacheStore>,
    memory: Arc<Mutex<HashMap<String, Value>>>,
}

impl CacheService {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            memory: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// A view of the cache restricted to one source.
    pub fn scope(&self, source_id: i64) -> SourceCache {
        SourceCache {
            service: self.clone(),
            source_id,
        }
    }

    async fn get_raw(&self, key: &str) -> Result<Option<Value>> {
        if let Some(value) = self.memory.lock().await.get(key) {
            return Ok(Some(value.clone()));
        }

        let value = self.store.get(key).await?;
        if let Some(value) = &value {
            self.memory
                .lock()
                .await
                .insert(key.to_string(), value.clone());
        }
        Ok(value)
    }

    async fn put_raw(&self, key: &str, value: Value) -> Result<()> {
        self.store.put(key, &value).await?;
        self.memory.lock().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// Cache view keyed by `{source_id}_{key}`.
#[derive(Clone)]
pub struct SourceCache {
    service: CacheService,
    source_id: i64,
}

impl SourceCache {
    fn key(&self, key: &str) -> String {
        format!("{}_{}", self.source_id, key)
    }

    /// Typed lookup; an entry of the wrong shape counts as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let scoped = self.key(key);
        let Some(value) = self.service.get_raw(&scoped).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => {
                log::warn!("Discarding cache entry {}: {}", scoped, e);
                Ok(None)
            }
        }
    }

    pub async fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.service.put_raw(&self.key(key), value).await
    }
}
