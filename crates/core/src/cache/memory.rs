//! In-memory TTL cache in front of the durable store.
//!
//! Bounded by entry count with least-recently-used eviction, and by age.
//! Not authoritative: a miss here falls through to [`super::CacheDb`].

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::entry::CacheEntry;

struct Slot {
    entry: CacheEntry,
    inserted_at: Instant,
}

/// Shared hot-key cache. One lock guards every access.
pub struct MemoryCache {
    inner: Mutex<LruCache<String, Slot>>,
    capacity: NonZeroUsize,
    ttl: Duration,
}

impl MemoryCache {
    pub fn new(capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self { inner: Mutex::new(LruCache::new(capacity)), capacity, ttl }
    }

    /// Copy of the entry for `key`, if present and younger than the TTL.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut cache = self.inner.lock().await;
        match cache.get(key) {
            Some(slot) if slot.inserted_at.elapsed() < self.ttl => return Some(slot.entry.clone()),
            Some(_) => {}
            None => return None,
        }
        cache.pop(key);
        None
    }

    /// Insert or replace, evicting the least recently used entry when full.
    pub async fn set(&self, key: impl Into<String>, entry: CacheEntry) {
        let slot = Slot { entry, inserted_at: Instant::now() };
        self.inner.lock().await.put(key.into(), slot);
    }

    /// Number of slots held, expired ones included until next touched.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::Headers;
    use bytes::Bytes;
    use chrono::Utc;

    fn entry(url: &str, body: &'static [u8]) -> CacheEntry {
        CacheEntry {
            key: url.to_string(),
            content: Bytes::from_static(body),
            headers: Headers::new(),
            status_code: 200,
            expected_size: body.len() as u64,
            timestamp: Utc::now(),
        }
    }

    fn cache(capacity: usize, ttl_secs: u64) -> MemoryCache {
        MemoryCache::new(NonZeroUsize::new(capacity).unwrap(), Duration::from_secs(ttl_secs))
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = cache(4, 60);
        assert!(cache.get("http://a/").await.is_none());

        cache.set("http://a/", entry("http://a/", b"hello")).await;
        let hit = cache.get("http://a/").await.unwrap();
        assert_eq!(hit.content, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_set_replaces() {
        let cache = cache(4, 60);
        cache.set("http://a/", entry("http://a/", b"old")).await;
        cache.set("http://a/", entry("http://a/", b"new")).await;
        assert_eq!(cache.get("http://a/").await.unwrap().content, Bytes::from_static(b"new"));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let cache = cache(2, 60);
        cache.set("http://a/", entry("http://a/", b"a")).await;
        cache.set("http://b/", entry("http://b/", b"b")).await;
        assert!(cache.get("http://a/").await.is_some());

        cache.set("http://c/", entry("http://c/", b"c")).await;
        assert_eq!(cache.len().await, cache.capacity());
        assert!(cache.get("http://a/").await.is_some());
        assert!(cache.get("http://b/").await.is_none());
        assert!(cache.get("http://c/").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = cache(4, 10);
        cache.set("http://a/", entry("http://a/", b"a")).await;

        tokio::time::advance(Duration::from_millis(9_990)).await;
        assert!(cache.get("http://a/").await.is_some());

        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(cache.get("http://a/").await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_returns_independent_copies() {
        let cache = cache(4, 60);
        cache.set("http://a/", entry("http://a/", b"a")).await;

        let mut copy = cache.get("http://a/").await.unwrap();
        copy.headers.append("X-Mutated", "1");
        assert!(cache.get("http://a/").await.unwrap().headers.is_empty());
    }
}
