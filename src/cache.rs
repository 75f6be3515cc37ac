//! Memoisation of expensive collaborator calls (LLM requests, geocoding).
//!
//! Callers derive a key from their arguments with [`cache_key`] and store the JSON answer.
//! The file-backed cache is read-modify-written on every `put`, so it must not be shared by
//! concurrently running processes.

use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::sync::Mutex;
use tracing::warn;

/// A key → JSON value store.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;

    async fn put(&self, key: &str, value: Value);
}

/// Stable key for a serializable argument tuple: hex SHA-256 of its JSON encoding.
pub fn cache_key<T: Serialize + ?Sized>(args: &T) -> Result<String> {
    let encoded = serde_json::to_vec(args)?;
    Ok(hex::encode(Sha256::digest(&encoded)))
}

/// In-process cache, used in tests and when no cache file is configured.
#[derive(Default)]
pub struct MemoryCache {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        self.values.read().ok()?.get(key).cloned()
    }

    async fn put(&self, key: &str, value: Value) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.to_string(), value);
        }
    }
}

/// Cache persisted as a single JSON object on disk.
pub struct JsonFileCache {
    path: PathBuf,
    // serialises read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl JsonFileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Map<String, Value> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(_) => return Map::new(),
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                warn!(path = %self.path.display(), "Cache file is not a JSON object, starting empty");
                Map::new()
            }
        }
    }

    async fn write_all(&self, map: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let encoded = serde_json::to_string_pretty(map)?;
        tokio::fs::write(&self.path, encoded).await?;
        Ok(())
    }
}

#[async_trait]
impl ResultCache for JsonFileCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let _guard = self.lock.lock().await;
        self.read_all().await.remove(key)
    }

    async fn put(&self, key: &str, value: Value) {
        let _guard = self.lock.lock().await;
        let mut map = self.read_all().await;
        map.insert(key.to_string(), value);
        if let Err(e) = self.write_all(&map).await {
            warn!(path = %self.path.display(), error = %e, "Failed to write cache file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_is_stable() {
        let a = cache_key(&("geocode", "Karlsruhe")).unwrap();
        let b = cache_key(&("geocode", "Karlsruhe")).unwrap();
        let c = cache_key(&("geocode", "Mannheim")).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_memory_cache() {
        let cache = MemoryCache::new();
        assert!(cache.get("k").await.is_none());
        cache.put("k", json!({"lat": 1})).await;
        assert_eq!(cache.get("k").await, Some(json!({"lat": 1})));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_file_cache_survives_reopen() {
        let path = std::env::temp_dir()
            .join(format!("windscout-cache-{}", uuid::Uuid::new_v4()))
            .join("cache.json");

        let cache = JsonFileCache::new(&path);
        assert!(cache.get("k").await.is_none());
        cache.put("k", json!("v")).await;
        cache.put("other", json!(2)).await;

        let reopened = JsonFileCache::new(&path);
        assert_eq!(reopened.get("k").await, Some(json!("v")));
        assert_eq!(reopened.get("other").await, Some(json!(2)));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
