//! Memory Store
//!
//! Minimal key/value memory shared across cycles. Perceive recalls entries
//! related to the input; the controller remembers each cycle's final output.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

/// Free-form metadata attached to an entry
pub type Metadata = serde_json::Map<String, Value>;

/// Metadata key written on every `put`
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Key/value store trait
///
/// Implementations guard their state internally so a store can be shared
/// between controllers through an `Arc`.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert or overwrite; stamps `timestamp` into the metadata
    async fn put(&self, key: &str, value: Value, metadata: Option<Metadata>);

    /// Exact lookup
    async fn get(&self, key: &str) -> Option<Value>;

    /// Metadata of an entry, without touching its recency
    async fn metadata(&self, key: &str) -> Option<Metadata>;

    /// Case-insensitive substring search over keys and string values
    async fn search(&self, query: &str, limit: usize) -> Vec<(String, Value)>;

    /// Remove all entries
    async fn clear(&self);

    /// Number of entries
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Entry {
    value: Value,
    metadata: Metadata,
    last_access: u64,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    clock: u64,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_least_recent(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            tracing::debug!(key = %key, "Evicting least recently used memory entry");
            self.entries.remove(&key);
        }
    }
}

/// In-process memory store, optionally bounded with LRU eviction
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    capacity: Option<NonZeroUsize>,
}

impl InMemoryStore {
    /// Unbounded store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding at most `capacity` entries
    pub fn bounded(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::default(),
            capacity: Some(capacity),
        }
    }

    pub const fn capacity(&self) -> Option<NonZeroUsize> {
        self.capacity
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn put(&self, key: &str, value: Value, metadata: Option<Metadata>) {
        let mut metadata = metadata.unwrap_or_default();
        metadata.insert(TIMESTAMP_KEY.into(), Value::String(Utc::now().to_rfc3339()));

        let mut inner = self.inner.lock().await;
        let last_access = inner.tick();

        if !inner.entries.contains_key(key) {
            if let Some(capacity) = self.capacity {
                while inner.entries.len() >= capacity.get() {
                    inner.evict_least_recent();
                }
            }
        }

        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                metadata,
                last_access,
            },
        );
    }

    async fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock().await;
        let now = inner.tick();
        inner.entries.get_mut(key).map(|entry| {
            entry.last_access = now;
            entry.value.clone()
        })
    }

    async fn metadata(&self, key: &str) -> Option<Metadata> {
        let inner = self.inner.lock().await;
        inner.entries.get(key).map(|entry| entry.metadata.clone())
    }

    async fn search(&self, query: &str, limit: usize) -> Vec<(String, Value)> {
        let needle = query.to_lowercase();
        let inner = self.inner.lock().await;

        inner
            .entries
            .iter()
            .filter(|(key, entry)| {
                key.to_lowercase().contains(&needle)
                    || entry
                        .value
                        .as_str()
                        .is_some_and(|text| text.to_lowercase().contains(&needle))
            })
            .take(limit)
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    async fn clear(&self) {
        self.inner.lock().await.entries.clear();
    }

    async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cap(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_put_get_overwrite() {
        let store = InMemoryStore::new();
        store.put("a", json!(1), None).await;
        store.put("a", json!(2), None).await;

        assert_eq!(store.get("a").await, Some(json!(2)));
        assert_eq!(store.get("missing").await, None);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_timestamp_recorded_in_metadata() {
        let store = InMemoryStore::new();
        let mut meta = Metadata::new();
        meta.insert("source".into(), json!("test"));
        store.put("k", json!("v"), Some(meta)).await;

        let meta = store.metadata("k").await.unwrap();
        assert_eq!(meta["source"], "test");
        assert!(meta.contains_key(TIMESTAMP_KEY));
    }

    #[tokio::test]
    async fn test_search_keys_and_text_values() {
        let store = InMemoryStore::new();
        store.put("Weather:Paris", json!(12), None).await;
        store.put("note", json!("It is RAINY in paris"), None).await;
        store.put("other", json!({"paris": true}), None).await;

        let hits = store.search("PARIS", 10).await;
        let keys: Vec<_> = hits.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["Weather:Paris", "note"]);

        assert_eq!(store.search("paris", 1).await.len(), 1);
        assert_eq!(store.search("paris", 10).await, store.search("paris", 10).await);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = InMemoryStore::new();
        store.put("a", json!(1), None).await;
        store.clear().await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_bounded_evicts_least_recently_accessed() {
        let store = InMemoryStore::bounded(cap(3));
        store.put("a", json!(1), None).await;
        store.put("b", json!(2), None).await;
        store.put("c", json!(3), None).await;

        // touch "a" so "b" becomes the oldest
        assert!(store.get("a").await.is_some());
        store.put("d", json!(4), None).await;

        assert_eq!(store.len().await, 3);
        assert_eq!(store.get("b").await, None);
        assert!(store.get("a").await.is_some());
        assert!(store.get("d").await.is_some());
    }

    #[tokio::test]
    async fn test_bounded_overwrite_does_not_evict() {
        let store = InMemoryStore::bounded(cap(2));
        store.put("a", json!(1), None).await;
        store.put("b", json!(2), None).await;
        store.put("a", json!(10), None).await;

        assert_eq!(store.len().await, 2);
        assert_eq!(store.get("b").await, Some(json!(2)));

        // "b" was just read, so "a" goes next
        store.put("c", json!(3), None).await;
        assert_eq!(store.get("a").await, None);
    }

    #[tokio::test]
    async fn test_search_does_not_refresh_recency() {
        let store = InMemoryStore::bounded(cap(2));
        store.put("alpha", json!(1), None).await;
        store.put("beta", json!(2), None).await;
        assert_eq!(store.search("alpha", 5).await.len(), 1);

        store.put("gamma", json!(3), None).await;
        assert_eq!(store.get("alpha").await, None);
    }
}
