use crate::metrics::{CACHE_EVICTIONS_TOTAL, CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlCacheConfig {
    /// Time-to-live for cache entries in milliseconds
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Maximum number of entries
    #[serde(default = "default_max_size")]
    pub max_size: usize,
}

fn default_ttl_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_max_size() -> usize {
    1000
}

impl Default for TtlCacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
            max_size: default_max_size(),
        }
    }
}

impl TtlCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub evicted: u64,
}

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

struct Inner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    /// Insertion order; front is the oldest-inserted live key
    order: VecDeque<K>,
    hits: u64,
    misses: u64,
    expired: u64,
    evicted: u64,
}

/// Bounded in-process cache with time-expiring entries.
///
/// Eviction at capacity is FIFO by insertion order, not LRU by access
/// recency; a read never refreshes an entry's position or TTL. Callers
/// requiring recency-based eviction must not rely on this cache. Expired
/// entries are removed lazily, by the read that observes them.
pub struct TtlCache<K, V> {
    name: String,
    config: TtlCacheConfig,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> std::fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a new cache instance
    pub fn new(name: impl Into<String>, config: TtlCacheConfig) -> Self {
        let name = name.into();
        info!(
            cache = %name,
            ttl_ms = config.ttl_ms,
            max_size = config.max_size,
            "Creating TTL cache"
        );

        Self {
            name,
            config,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                hits: 0,
                misses: 0,
                expired: 0,
                evicted: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a key. An entry older than the TTL is treated as absent and
    /// removed by this read; a hit does not extend the entry's lifetime.
    pub async fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().await;

        let expired = inner
            .entries
            .get(key)
            .map(|entry| entry.inserted_at.elapsed() > self.config.ttl());

        match expired {
            None => {
                inner.misses += 1;
                counter!(CACHE_MISSES_TOTAL, "cache" => self.name.clone()).increment(1);
                None
            }
            Some(true) => {
                inner.entries.remove(key);
                remove_from_order(&mut inner.order, key);
                inner.expired += 1;
                inner.misses += 1;
                counter!(CACHE_MISSES_TOTAL, "cache" => self.name.clone()).increment(1);
                debug!(cache = %self.name, "Expired entry removed on read");
                None
            }
            Some(false) => {
                inner.hits += 1;
                counter!(CACHE_HITS_TOTAL, "cache" => self.name.clone()).increment(1);
                inner.entries.get(key).map(|entry| entry.value.clone())
            }
        }
    }

    /// Insert or overwrite. Overwriting creates a fresh entry, so the key
    /// moves to the back of the insertion order. At capacity, the single
    /// oldest-inserted entry is evicted to make room for a new key.
    pub async fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock().await;

        if inner.entries.contains_key(&key) {
            remove_from_order(&mut inner.order, &key);
        } else if inner.entries.len() >= self.config.max_size {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
                inner.evicted += 1;
                counter!(CACHE_EVICTIONS_TOTAL, "cache" => self.name.clone()).increment(1);
                debug!(cache = %self.name, "Evicted oldest-inserted entry");
            }
        }

        inner.order.push_back(key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Remove a single entry
    pub async fn invalidate(&self, key: &K) {
        let mut inner = self.inner.lock().await;
        if inner.entries.remove(key).is_some() {
            remove_from_order(&mut inner.order, key);
            debug!(cache = %self.name, "Invalidated cache entry");
        }
    }

    /// Drop all entries
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
        inner.order.clear();
        info!(cache = %self.name, "Cleared all cache entries");
    }

    /// Number of physically present entries, expired or not
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            entry_count: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
            expired: inner.expired,
            evicted: inner.evicted,
        }
    }
}

fn remove_from_order<K: PartialEq>(order: &mut VecDeque<K>, key: &K) {
    if let Some(pos) = order.iter().position(|k| k == key) {
        order.remove(pos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn cache_with(ttl_ms: u64, max_size: usize) -> TtlCache<String, Vec<u32>> {
        TtlCache::new(
            "test-cache",
            TtlCacheConfig { ttl_ms, max_size },
        )
    }

    #[test]
    fn test_default_config() {
        let config = TtlCacheConfig::default();
        assert_eq!(config.ttl_ms, 300_000);
        assert_eq!(config.max_size, 1000);
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let cache = cache_with(60_000, 10);

        cache.insert("boxes:ward-3".to_string(), vec![1, 2, 3]).await;

        assert_eq!(
            cache.get(&"boxes:ward-3".to_string()).await,
            Some(vec![1, 2, 3])
        );
        assert_eq!(cache.get(&"boxes:ward-4".to_string()).await, None);
    }

    #[tokio::test]
    async fn test_entries_expire_and_are_removed_on_read() {
        let cache = cache_with(50, 10);

        cache.insert("k".to_string(), vec![1]).await;

        sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get(&"k".to_string()).await, Some(vec![1]));

        sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get(&"k".to_string()).await, None);

        // The expired read deleted the entry
        assert_eq!(cache.len().await, 0);
        let stats = cache.stats().await;
        assert_eq!(stats.expired, 1);
    }

    #[tokio::test]
    async fn test_hit_does_not_extend_ttl() {
        let cache = cache_with(60, 10);

        cache.insert("k".to_string(), vec![1]).await;

        sleep(Duration::from_millis(35)).await;
        assert!(cache.get(&"k".to_string()).await.is_some());

        // Past the original deadline despite the recent hit
        sleep(Duration::from_millis(35)).await;
        assert_eq!(cache.get(&"k".to_string()).await, None);
    }

    #[tokio::test]
    async fn test_eviction_is_fifo_not_lru() {
        let cache = cache_with(60_000, 3);

        cache.insert("a".to_string(), vec![1]).await;
        cache.insert("b".to_string(), vec![2]).await;
        cache.insert("c".to_string(), vec![3]).await;

        // Touch "a" so LRU would evict "b"; FIFO must still evict "a"
        assert!(cache.get(&"a".to_string()).await.is_some());

        cache.insert("d".to_string(), vec![4]).await;

        assert_eq!(cache.len().await, 3);
        assert_eq!(cache.get(&"a".to_string()).await, None);
        assert!(cache.get(&"b".to_string()).await.is_some());
        assert!(cache.get(&"c".to_string()).await.is_some());
        assert!(cache.get(&"d".to_string()).await.is_some());
        assert_eq!(cache.stats().await.evicted, 1);
    }

    #[tokio::test]
    async fn test_overwrite_moves_key_to_back_of_fifo() {
        let cache = cache_with(60_000, 3);

        cache.insert("a".to_string(), vec![1]).await;
        cache.insert("b".to_string(), vec![2]).await;
        cache.insert("c".to_string(), vec![3]).await;

        // Overwrite makes "a" the newest insertion; "b" becomes the oldest
        cache.insert("a".to_string(), vec![10]).await;
        assert_eq!(cache.len().await, 3);

        cache.insert("d".to_string(), vec![4]).await;

        assert_eq!(cache.get(&"b".to_string()).await, None);
        assert_eq!(cache.get(&"a".to_string()).await, Some(vec![10]));
    }

    #[tokio::test]
    async fn test_overwrite_at_capacity_does_not_evict() {
        let cache = cache_with(60_000, 2);

        cache.insert("a".to_string(), vec![1]).await;
        cache.insert("b".to_string(), vec![2]).await;
        cache.insert("a".to_string(), vec![3]).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.stats().await.evicted, 0);
        assert!(cache.get(&"b".to_string()).await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let cache = cache_with(60_000, 10);

        cache.insert("a".to_string(), vec![1]).await;
        cache.insert("b".to_string(), vec![2]).await;

        cache.invalidate(&"a".to_string()).await;
        assert_eq!(cache.get(&"a".to_string()).await, None);
        assert!(cache.get(&"b".to_string()).await.is_some());

        cache.clear().await;
        assert!(cache.is_empty().await);
        assert_eq!(cache.get(&"b".to_string()).await, None);
    }

    #[tokio::test]
    async fn test_size_never_exceeds_max() {
        let cache = cache_with(60_000, 5);

        for i in 0..20 {
            cache.insert(format!("key-{i}"), vec![i]).await;
            assert!(cache.len().await <= 5);
        }
        assert_eq!(cache.stats().await.evicted, 15);
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let cache = cache_with(60_000, 10);

        cache.insert("a".to_string(), vec![1]).await;

        assert!(cache.get(&"a".to_string()).await.is_some());
        assert!(cache.get(&"missing".to_string()).await.is_none());
        assert!(cache.get(&"a".to_string()).await.is_some());

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
    }
}
