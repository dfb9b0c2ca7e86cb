//! Response caching with TTL for expensive upstream lookups
//!
//! Provides a thread-safe, TTL-based cache for idempotent advisory queries
//! (weather forecasts, market prices, parcel lookups). Cache keys are
//! computed from `prefix:params_hash` where `params_hash` is the SHA-256
//! digest of the order-normalized JSON parameters, so equivalent calls
//! collapse to the same entry regardless of parameter ordering.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::CacheConfig;

/// Thread-safe response cache with TTL expiry
pub struct ResponseCache {
    /// Cache entries keyed by `prefix:params_hash`
    entries: DashMap<String, CachedResponse>,
    /// TTL applied when `set` is called without one
    default_ttl: Duration,
    /// Cache statistics
    stats: CacheStats,
}

/// A cached response with TTL metadata
struct CachedResponse {
    /// The cached JSON value
    value: Value,
    /// When this entry was cached
    cached_at: Instant,
    /// Time-to-live duration
    ttl: Duration,
}

impl CachedResponse {
    /// Check if this entry has expired
    fn is_expired(&self) -> bool {
        Instant::now().duration_since(self.cached_at) > self.ttl
    }
}

/// Cache statistics tracked atomically
#[derive(Debug)]
pub struct CacheStats {
    /// Total cache hits (entries served from cache)
    pub hits: AtomicU64,
    /// Total cache misses (entries not found or expired)
    pub misses: AtomicU64,
    /// Total evictions (expired entries removed)
    pub evictions: AtomicU64,
}

impl CacheStats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Get current cache hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get current cache miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get current eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Calculate hit rate (0.0-1.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

impl ResponseCache {
    /// Create a new empty cache
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl: config.default_ttl,
            stats: CacheStats::new(),
        }
    }

    /// Get a cached response if it exists and hasn't expired
    ///
    /// Returns `None` if the key doesn't exist or the entry has expired.
    /// Expired entries are evicted eagerly on the failed read, so a `get`
    /// never returns a stale value even without the background sweep.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.entries.remove(key);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            } else {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Store a value in the cache
    ///
    /// # Arguments
    ///
    /// * `key` - Cache key (typically from [`ResponseCache::make_key`])
    /// * `value` - JSON value to cache; the cache treats it as opaque
    /// * `ttl` - Time-to-live, or `None` for the configured default
    pub fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let entry = CachedResponse {
            value,
            cached_at: Instant::now(),
            ttl: ttl.unwrap_or(self.default_ttl),
        };
        self.entries.insert(key.to_string(), entry);
    }

    /// Build a cache key from a prefix and a flat parameter map
    ///
    /// The key format is `{prefix}:{params_hash}` where `params_hash` is
    /// the SHA-256 hex digest of the parameters serialized with sorted
    /// keys. Equivalent parameter maps produce identical keys regardless
    /// of the order the call site supplied them in.
    #[must_use]
    pub fn make_key(prefix: &str, params: &Value) -> String {
        let params_hash = Self::hash_params(params);
        format!("{prefix}:{params_hash}")
    }

    /// Compute SHA-256 hash of parameters in canonical (key-sorted) form
    fn hash_params(params: &Value) -> String {
        let canonical = match params.as_object() {
            Some(map) => {
                let sorted: BTreeMap<&String, &Value> = map.iter().collect();
                serde_json::to_string(&sorted).unwrap_or_default()
            }
            None => serde_json::to_string(params).unwrap_or_default(),
        };
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let result = hasher.finalize();
        format!("{result:x}")
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            evictions: self.stats.evictions(),
            size: self.entries.len(),
            hit_rate: self.stats.hit_rate(),
        }
    }

    /// Clear all cached entries
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Evict expired entries
    ///
    /// Not required for correctness of `get`/`set`; bounds memory in
    /// long-running processes. Typically driven by [`spawn_sweeper`].
    pub fn clear_expired(&self) {
        let keys_to_remove: Vec<String> = self
            .entries
            .iter()
            .filter_map(|entry| {
                if entry.value().is_expired() {
                    Some(entry.key().clone())
                } else {
                    None
                }
            })
            .collect();

        let count = keys_to_remove.len();
        for key in keys_to_remove {
            self.entries.remove(&key);
        }

        if count > 0 {
            self.stats
                .evictions
                .fetch_add(count as u64, Ordering::Relaxed);
            debug!(evicted = count, "Swept expired cache entries");
        }
    }
}

/// Spawn a periodic sweep of expired entries
///
/// The returned handle is owned by the host process, which aborts it on
/// shutdown. The cache itself schedules nothing.
pub fn spawn_sweeper(cache: Arc<ResponseCache>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            cache.clear_expired();
        }
    })
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsSnapshot {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Total evictions
    pub evictions: u64,
    /// Current number of entries
    pub size: usize,
    /// Hit rate (0.0-1.0)
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn cache() -> ResponseCache {
        ResponseCache::new(&CacheConfig::default())
    }

    #[test]
    fn test_cache_hit() {
        let cache = cache();
        let value = json!({"forecast": "dry", "risk": "low"});

        cache.set("weather:abc", value.clone(), Some(Duration::from_secs(60)));
        let retrieved = cache.get("weather:abc");

        assert_eq!(retrieved, Some(value));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn test_cache_miss() {
        let cache = cache();
        let retrieved = cache.get("nonexistent");

        assert_eq!(retrieved, None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_cache_expiry() {
        let cache = cache();
        cache.set("key", json!({"stale": true}), Some(Duration::from_millis(10)));

        assert_eq!(cache.get("key"), Some(json!({"stale": true})));

        std::thread::sleep(Duration::from_millis(15));

        // Expired entry is deleted on the failed read
        assert_eq!(cache.get("key"), None);
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_default_ttl_applies() {
        let cache = ResponseCache::new(&CacheConfig {
            default_ttl: Duration::from_millis(10),
        });
        cache.set("key", json!(1), None);

        assert_eq!(cache.get("key"), Some(json!(1)));
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(cache.get("key"), None);
    }

    #[test]
    fn test_make_key_order_independent() {
        let key1 = ResponseCache::make_key("weather", &json!({"lat": 1, "lng": 2}));
        let key2 = ResponseCache::make_key("weather", &json!({"lng": 2, "lat": 1}));

        assert_eq!(key1, key2);
        assert!(key1.starts_with("weather:"));
        // SHA-256 hex digest
        assert_eq!(key1.split(':').nth(1).expect("hash part").len(), 64);
    }

    #[test]
    fn test_make_key_distinguishes_params() {
        let key1 = ResponseCache::make_key("prices", &json!({"commodity": "wheat"}));
        let key2 = ResponseCache::make_key("prices", &json!({"commodity": "rice"}));
        let key3 = ResponseCache::make_key("parcels", &json!({"commodity": "wheat"}));

        assert_ne!(key1, key2);
        assert_ne!(key1, key3);
    }

    #[test]
    fn test_clear_expired() {
        let cache = cache();
        cache.set("short", json!(1), Some(Duration::from_millis(10)));
        cache.set("long", json!(2), Some(Duration::from_secs(60)));

        std::thread::sleep(Duration::from_millis(15));
        cache.clear_expired();

        assert_eq!(cache.stats().size, 1);
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.get("long"), Some(json!(2)));
    }

    #[test]
    fn test_clear() {
        let cache = cache();
        cache.set("key1", json!(1), None);
        cache.set("key2", json!(2), None);

        assert_eq!(cache.stats().size, 2);
        cache.clear();
        assert_eq!(cache.stats().size, 0);
        assert_eq!(cache.get("key1"), None);
    }

    #[test]
    fn test_hit_rate() {
        let cache = cache();
        cache.set("key1", json!(1), None);
        cache.set("key2", json!(2), None);

        cache.get("key1");
        cache.get("key2");
        cache.get("key3");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.666).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_sweeper_evicts_in_background() {
        let cache = Arc::new(ResponseCache::new(&CacheConfig::default()));
        cache.set("short", json!(1), Some(Duration::from_millis(5)));

        let handle = spawn_sweeper(Arc::clone(&cache), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.abort();

        assert_eq!(cache.stats().size, 0);
        assert_eq!(cache.stats().evictions, 1);
    }
}
