//! Response cache for fetched word information.
//!
//! A plain key → value map. Callers normalize keys before using it (see
//! [`cache_key`](crate::word_info::cache_key)); the cache never rewrites keys.
//! By default it is unbounded and entries never expire. [`ResponseCache::with_capacity`]
//! adds least-recently-used eviction and [`ResponseCache::with_ttl`] adds expiry.

use crate::clock::{Clock, MonotonicClock};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// A cached value and when it was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    value: V,
    stored_at: u64,
}

impl<V> CacheEntry<V> {
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Clock reading (millis) at insertion.
    pub fn stored_at(&self) -> u64 {
        self.stored_at
    }

    fn is_expired(&self, now: u64, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| {
            let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
            now.saturating_sub(self.stored_at) >= ttl_ms
        })
    }
}

/// In-memory cache of provider responses, safe to share across tasks.
pub struct ResponseCache<V> {
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    ttl: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl<V> std::fmt::Debug for ResponseCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("ResponseCache")
            .field("len", &entries.len())
            .field("capacity", &entries.cap())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<V: Clone> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> ResponseCache<V> {
    /// Unbounded cache without expiry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
            ttl: None,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Bounded cache; inserting past `capacity` evicts the least recently used entry.
    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self { entries: Mutex::new(LruCache::new(capacity)), ..Self::new() }
    }

    /// Treat entries older than `ttl` as absent.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Override the clock used for `stored_at` and expiry.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Value for `key`, if present and not expired. Marks it recently used.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();
        let expired = entries.get(key)?.is_expired(now, self.ttl);
        if expired {
            trace!(key, "evicting expired cache entry");
            entries.pop(key);
            return None;
        }
        entries.peek(key).map(|entry| entry.value.clone())
    }

    /// Full entry for `key`, without touching recency.
    pub fn entry(&self, key: &str) -> Option<CacheEntry<V>> {
        let now = self.clock.now_millis();
        let entries = self.entries.lock();
        entries.peek(key).filter(|entry| !entry.is_expired(now, self.ttl)).cloned()
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn set(&self, key: impl Into<String>, value: V) {
        let entry = CacheEntry { value, stored_at: self.clock.now_millis() };
        let mut entries = self.entries.lock();
        if let Some((evicted, _)) = entries.push(key.into(), entry) {
            trace!(key = %evicted, "cache entry evicted or replaced");
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.entry(key).is_some()
    }

    /// Drop one entry; returns its value if it was present.
    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.lock().pop(key).map(|entry| entry.value)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Stored entries, including any expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn set_then_get_is_idempotent() {
        let cache = ResponseCache::new();
        cache.set("hello", 42);
        assert_eq!(cache.get("hello"), Some(42));
        assert_eq!(cache.get("hello"), Some(42));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn set_overwrites() {
        let cache = ResponseCache::new();
        cache.set("k", "first".to_string());
        cache.set("k", "second".to_string());
        assert_eq!(cache.get("k").as_deref(), Some("second"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn keys_are_not_normalized() {
        let cache = ResponseCache::new();
        cache.set("apple", 1);
        assert!(cache.has("apple"));
        assert!(!cache.has("Apple"));
        assert!(!cache.has(" apple"));
    }

    #[test]
    fn remove_and_clear() {
        let cache = ResponseCache::new();
        cache.set("a", 1);
        cache.set("b", 2);

        assert_eq!(cache.remove("a"), Some(1));
        assert_eq!(cache.remove("a"), None);
        assert!(cache.has("b"));

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn entry_records_stored_at() {
        let clock = ManualClock::new();
        clock.set_millis(5_000);
        let cache = ResponseCache::new().with_clock(clock);
        cache.set("k", 'v');

        let entry = cache.entry("k").unwrap();
        assert_eq!(entry.stored_at(), 5_000);
        assert_eq!(*entry.value(), 'v');
    }

    #[test]
    fn ttl_expires_entries() {
        let clock = ManualClock::new();
        let cache =
            ResponseCache::new().with_ttl(Duration::from_secs(60)).with_clock(clock.clone());
        cache.set("k", 1);

        clock.advance(Duration::from_secs(59));
        assert!(cache.has("k"));
        assert_eq!(cache.get("k"), Some(1));

        clock.advance(Duration::from_secs(1));
        assert!(!cache.has("k"));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty(), "expired entry is evicted on read");
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache = ResponseCache::with_capacity(NonZeroUsize::new(2).unwrap());
        cache.set("a", 1);
        cache.set("b", 2);

        // Touch "a" so "b" becomes the eviction candidate.
        assert_eq!(cache.get("a"), Some(1));
        cache.set("c", 3);

        assert!(cache.has("a"));
        assert!(!cache.has("b"));
        assert!(cache.has("c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn has_does_not_promote() {
        let cache = ResponseCache::with_capacity(NonZeroUsize::new(2).unwrap());
        cache.set("a", 1);
        cache.set("b", 2);

        assert!(cache.has("a"));
        cache.set("c", 3);

        assert!(!cache.has("a"));
        assert!(cache.has("b"));
    }
}
