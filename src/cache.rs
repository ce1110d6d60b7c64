// src/cache.rs
//! TTL response cache with priority-weighted eviction.
//!
//! Entries expire lazily on read and eagerly via a background sweep, so even
//! cold never-read entries cannot pin memory. When the store hits its
//! capacity bound it evicts the lowest-priority, least-recently-accessed 20%
//! of entries; the two-factor policy keeps hot low-priority entries alive
//! longer than cold ones without letting them starve high-priority data.
//!
//! Nothing here can fail: a cache problem is a miss, never an error.

use crate::config::CacheConfig;
use crate::queue::Priority;
use log::debug;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::interval;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    created_at: Instant,
    ttl: Duration,
    priority: Priority,
    access_count: u64,
    last_accessed: Instant,
}

impl CacheEntry {
    fn new(value: Value, ttl: Duration, priority: Priority) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            ttl,
            priority,
            access_count: 0,
            last_accessed: now,
        }
    }

    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }

    fn access(&mut self) -> Value {
        self.last_accessed = Instant::now();
        self.access_count += 1;
        self.value.clone()
    }
}

#[derive(Debug, Default, Clone)]
struct CacheCounters {
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Measured cache statistics. Hit rate is computed from real counters.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

/// In-memory store of cached responses keyed by request fingerprint.
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    counters: RwLock<CacheCounters>,
    config: CacheConfig,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            counters: RwLock::new(CacheCounters::default()),
            config,
        }
    }

    /// Look up a fingerprint. Expired entries are removed on the spot and
    /// reported as misses; hits bump the entry's access tracking.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.write().await;
        let mut counters = self.counters.write().await;

        if let Some(entry) = entries.get_mut(key) {
            if !entry.is_expired() {
                counters.hits += 1;
                return Some(entry.access());
            }
            entries.remove(key);
        }

        counters.misses += 1;
        None
    }

    /// Insert a response, evicting the least valuable 20% of entries first if
    /// the store is at capacity.
    pub async fn put(&self, key: &str, value: Value, ttl: Duration, priority: Priority) {
        let mut entries = self.entries.write().await;

        if entries.len() >= self.config.max_entries && !entries.contains_key(key) {
            let evict_count = (entries.len() / 5).max(1);
            let mut ranked: Vec<(String, Priority, Instant)> = entries
                .iter()
                .map(|(k, e)| (k.clone(), e.priority, e.last_accessed))
                .collect();
            // Lowest priority first, oldest access breaking ties
            ranked.sort_by_key(|(_, priority, last_accessed)| (*priority, *last_accessed));
            for (victim, _, _) in ranked.into_iter().take(evict_count) {
                entries.remove(&victim);
            }
            self.counters.write().await.evictions += evict_count as u64;
            debug!("cache at capacity, evicted {} entries", evict_count);
        }

        entries.insert(key.to_string(), CacheEntry::new(value, ttl, priority));
    }

    /// Remove entries whose key contains `pattern`, or everything when no
    /// pattern is given. Returns the number of entries removed.
    pub async fn invalidate(&self, pattern: Option<&str>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        match pattern {
            Some(pattern) => entries.retain(|key, _| !key.contains(pattern)),
            None => entries.clear(),
        }
        let removed = before - entries.len();
        debug!("invalidated {} cache entries (pattern: {:?})", removed, pattern);
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn stats(&self) -> CacheStats {
        let size = self.entries.read().await.len();
        let counters = self.counters.read().await.clone();
        let lookups = counters.hits + counters.misses;
        CacheStats {
            size,
            hits: counters.hits,
            misses: counters.misses,
            evictions: counters.evictions,
            hit_rate: if lookups > 0 {
                counters.hits as f64 / lookups as f64
            } else {
                0.0
            },
        }
    }

    /// Spawn the periodic sweep that drops expired entries regardless of
    /// access. The engine owns the handle and aborts it on destroy.
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        let cache = self;
        tokio::spawn(async move {
            let mut ticker = interval(cache.config.sweep_interval);
            loop {
                ticker.tick().await;
                let swept = {
                    let mut entries = cache.entries.write().await;
                    let before = entries.len();
                    entries.retain(|_, entry| !entry.is_expired());
                    before - entries.len()
                };
                if swept > 0 {
                    cache.counters.write().await.evictions += swept as u64;
                    debug!("cache sweep removed {} expired entries", swept);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::time::sleep;

    fn small_config(max_entries: usize) -> CacheConfig {
        CacheConfig {
            max_entries,
            sweep_interval: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn ttl_expiry_on_read() {
        let cache = ResponseCache::new(small_config(10));
        cache
            .put("GET:/a::medium", json!(1), Duration::from_millis(100), Priority::Medium)
            .await;

        sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get("GET:/a::medium").await, Some(json!(1)));

        sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.get("GET:/a::medium").await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn eviction_prefers_low_priority_lru() {
        let cache = ResponseCache::new(small_config(10));
        let ttl = Duration::from_secs(60);

        // High-priority entry inserted first and kept hot
        cache.put("GET:/hot::high", json!("hot"), ttl, Priority::High).await;
        for i in 0..9 {
            cache
                .put(&format!("GET:/cold{}::low", i), json!(i), ttl, Priority::Low)
                .await;
        }
        cache.get("GET:/hot::high").await;

        // Store is at capacity; this insert triggers a 20% eviction (2 entries)
        cache.put("GET:/new::medium", json!("new"), ttl, Priority::Medium).await;

        assert_eq!(cache.len().await, 9);
        assert!(cache.get("GET:/hot::high").await.is_some());
        // The two oldest low-priority entries went first
        assert!(cache.get("GET:/cold0::low").await.is_none());
        assert!(cache.get("GET:/cold1::low").await.is_none());
        assert!(cache.get("GET:/cold2::low").await.is_some());
    }

    #[tokio::test]
    async fn pattern_invalidation() {
        let cache = ResponseCache::new(small_config(10));
        let ttl = Duration::from_secs(60);
        cache.put("GET:/users/1::medium", json!(1), ttl, Priority::Medium).await;
        cache.put("GET:/users/2::medium", json!(2), ttl, Priority::Medium).await;
        cache.put("GET:/orders/9::medium", json!(9), ttl, Priority::Medium).await;

        assert_eq!(cache.invalidate(Some("/users/")).await, 2);
        assert_eq!(cache.len().await, 1);

        assert_eq!(cache.invalidate(None).await, 1);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn sweep_removes_cold_expired_entries() {
        let cache = Arc::new(ResponseCache::new(small_config(10)));
        cache
            .put("GET:/cold::low", json!(0), Duration::from_millis(10), Priority::Low)
            .await;

        let sweeper = Arc::clone(&cache).spawn_sweeper();
        sleep(Duration::from_millis(60)).await;
        sweeper.abort();

        // Entry vanished without ever being read
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn hit_rate_is_measured() {
        let cache = ResponseCache::new(small_config(10));
        cache
            .put("GET:/a::medium", json!(1), Duration::from_secs(60), Priority::Medium)
            .await;
        cache.get("GET:/a::medium").await;
        cache.get("GET:/missing::medium").await;

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }
}
