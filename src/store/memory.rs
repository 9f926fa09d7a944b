//! In-process cache storage.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheEntry, CacheStorage, CacheStore, ensure_storable};
use crate::error::Result;
use crate::request::Request;
use crate::response::Response;

/// A cache whose entries live in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    name: String,
    entries: RwLock<HashMap<String, CacheEntry>>,
    next_seq: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(&self, request: &Request) -> Result<Option<Response>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&request.cache_key())
            .filter(|entry| entry.matches(request))
            .map(|entry| entry.response.clone()))
    }

    async fn put(&self, request: &Request, response: Response) -> Result<()> {
        ensure_storable(request)?;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let entry = CacheEntry::new(request, response, seq);
        self.entries.write().await.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, request: &Request) -> Result<bool> {
        Ok(self
            .entries
            .write()
            .await
            .remove(&request.cache_key())
            .is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        let mut ordered: Vec<_> = entries.values().map(|e| (e.seq, e.key.clone())).collect();
        ordered.sort_unstable();
        Ok(ordered.into_iter().map(|(_, key)| key).collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }

    async fn trim(&self, max_entries: usize) -> Result<usize> {
        let mut entries = self.entries.write().await;
        if entries.len() <= max_entries {
            return Ok(0);
        }
        let mut ordered: Vec<_> = entries.values().map(|e| (e.seq, e.key.clone())).collect();
        ordered.sort_unstable();
        let excess = entries.len() - max_entries;
        for (_, key) in ordered.into_iter().take(excess) {
            entries.remove(&key);
        }
        Ok(excess)
    }
}

/// Named in-memory caches.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    caches: RwLock<HashMap<String, Arc<MemoryStore>>>,
}

impl MemoryStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>> {
        let mut caches = self.caches.write().await;
        let store = caches
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::new(name)));
        Ok(Arc::clone(store) as Arc<dyn CacheStore>)
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn names(&self) -> Result<Vec<String>> {
        let mut names: Vec<_> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(url: &str) -> Request {
        Request::get(url).unwrap()
    }

    #[tokio::test]
    async fn open_is_create_if_absent_and_shared() {
        let storage = MemoryStorage::new();
        assert!(!storage.has("dynamic").await.unwrap());

        let first = storage.open("dynamic").await.unwrap();
        first.put(&get("http://cdn/lib.js"), Response::ok("lib")).await.unwrap();

        let second = storage.open("dynamic").await.unwrap();
        assert_eq!(second.name(), "dynamic");
        let hit = second.match_request(&get("http://cdn/lib.js")).await.unwrap();
        assert_eq!(hit.unwrap().body().as_ref(), b"lib");
        assert!(storage.has("dynamic").await.unwrap());
    }

    #[tokio::test]
    async fn put_replaces_and_rejects_post() {
        let store = MemoryStore::new("s");
        let req = get("http://x/a");
        store.put(&req, Response::ok("one")).await.unwrap();
        store.put(&req, Response::ok("two")).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 1);
        let hit = store.match_request(&req).await.unwrap().unwrap();
        assert_eq!(hit.body().as_ref(), b"two");

        let post = Request::new(reqwest::Method::POST, req.url().clone());
        assert!(store.put(&post, Response::ok("x")).await.is_err());
    }

    #[tokio::test]
    async fn delete_entry() {
        let store = MemoryStore::new("s");
        let req = get("http://x/a");
        store.put(&req, Response::ok("a")).await.unwrap();
        assert!(store.delete(&req).await.unwrap());
        assert!(!store.delete(&req).await.unwrap());
        assert!(store.match_request(&req).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn trim_evicts_oldest() {
        let store = MemoryStore::new("s");
        for name in ["a", "b", "c", "d"] {
            store
                .put(&get(&format!("http://x/{name}")), Response::ok(name))
                .await
                .unwrap();
        }
        assert_eq!(store.trim(2).await.unwrap(), 2);
        assert_eq!(store.keys().await.unwrap(), vec!["http://x/c", "http://x/d"]);
        assert_eq!(store.trim(5).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_and_list_caches() {
        let storage = MemoryStorage::new();
        storage.open("b").await.unwrap();
        storage.open("a").await.unwrap();
        assert_eq!(storage.names().await.unwrap(), vec!["a", "b"]);
        assert!(storage.delete("a").await.unwrap());
        assert!(!storage.delete("a").await.unwrap());
        assert_eq!(storage.names().await.unwrap(), vec!["b"]);
    }
}
