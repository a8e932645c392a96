//! Time-bounded cache for upstream lookups
//!
//! Entries are keyed by symbol (or a fixed singleton key for the market
//! overview) and expire after a per-insert TTL. A miss or an expired entry
//! invokes the caller's fetcher; failed fetches are never cached.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Cached value with its expiry deadline
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Entry counts for the status endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total: usize,
    pub fresh: usize,
    pub stale: usize,
}

/// In-memory TTL cache
///
/// The lock is never held while a fetcher runs, so two concurrent misses
/// for the same key both reach upstream and the last writer wins.
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fresh value for `key`, if any
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.value.clone())
    }

    /// Store `value`, replacing any previous entry
    pub fn insert(&self, key: K, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().insert(key, entry);
    }

    /// Return the cached value or fetch, store and return a new one
    ///
    /// Fetch errors propagate to the caller and leave the cache untouched.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &K, ttl: Duration, fetcher: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let value = fetcher().await?;
        self.insert(key.clone(), value.clone(), ttl);
        Ok(value)
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        let purged = before - entries.len();
        if purged > 0 {
            debug!("Purged {} expired cache entries", purged);
        }
        purged
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.entries.read();
        let fresh = entries.values().filter(|e| e.is_fresh(now)).count();
        CacheStats {
            total: entries.len(),
            fresh,
            stale: entries.len() - fresh,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(3);

    #[tokio::test(start_paused = true)]
    async fn test_fresh_hit_skips_fetcher() {
        let cache: TtlCache<String, u32> = TtlCache::new();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let key = "BTC".to_string();

        let fetch = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(42)
        };

        assert_eq!(cache.get_or_fetch(&key, TTL, fetch).await, Ok(42));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get_or_fetch(&key, TTL, fetch).await, Ok(42));

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_refetches() {
        let cache: TtlCache<String, u32> = TtlCache::new();
        let key = "BTC".to_string();

        cache
            .get_or_fetch(&key, TTL, || async { Ok::<_, String>(1) })
            .await
            .unwrap();

        // Exactly at the deadline the entry is already stale
        tokio::time::advance(TTL).await;
        assert_eq!(cache.get(&key), None);

        let value = cache
            .get_or_fetch(&key, TTL, || async { Ok::<_, String>(2) })
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_not_cached() {
        let cache: TtlCache<String, u32> = TtlCache::new();
        let key = "ETH".to_string();

        let result = cache
            .get_or_fetch(&key, TTL, || async { Err::<u32, _>("upstream down") })
            .await;
        assert_eq!(result, Err("upstream down"));
        assert!(cache.is_empty());

        let value = cache
            .get_or_fetch(&key, TTL, || async { Ok::<_, &str>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_stale_entry_out_of_reads() {
        let cache: TtlCache<String, u32> = TtlCache::new();
        let key = "SOL".to_string();
        cache.insert(key.clone(), 5, TTL);

        tokio::time::advance(Duration::from_secs(4)).await;
        let result = cache
            .get_or_fetch(&key, TTL, || async { Err::<u32, _>("timeout") })
            .await;

        assert!(result.is_err());
        assert_eq!(cache.get(&key), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_and_purge() {
        let cache: TtlCache<&'static str, u32> = TtlCache::new();
        cache.insert("overview", 1, Duration::from_secs(30));
        cache.insert("BTC", 2, TTL);
        cache.insert("ETH", 3, TTL);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(
            cache.stats(),
            CacheStats {
                total: 3,
                fresh: 1,
                stale: 2
            }
        );

        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"overview"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_does_not_block_other_keys() {
        let cache: TtlCache<String, u32> = TtlCache::new();
        let slow_key = "BTC".to_string();
        let fast_key = "ETH".to_string();
        let start = Instant::now();

        let slow = cache.get_or_fetch(&slow_key, TTL, || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, String>(1)
        });
        let fast = async {
            let value = cache
                .get_or_fetch(&fast_key, TTL, || async { Ok::<_, String>(2) })
                .await;
            (value, start.elapsed(), cache.get(&fast_key))
        };

        let (slow_value, (fast_value, fast_elapsed, cached)) = tokio::join!(slow, fast);
        assert_eq!(slow_value, Ok(1));
        assert_eq!(fast_value, Ok(2));
        assert_eq!(fast_elapsed, Duration::ZERO);
        assert_eq!(cached, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_fetch_twice_last_write_wins() {
        let cache: TtlCache<String, u32> = TtlCache::new();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let key = "SOL".to_string();

        let first = cache.get_or_fetch(&key, TTL, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, String>(1)
        });
        let second = cache.get_or_fetch(&key, TTL, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok::<_, String>(2)
        });

        let (first, second) = tokio::join!(first, second);
        assert_eq!(first, Ok(1));
        assert_eq!(second, Ok(2));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get(&key), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reads_of_fresh_entry_share_one_fetch() {
        let cache: TtlCache<String, u32> = TtlCache::new();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let key = "BTC".to_string();
        let fetch = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(9)
        };

        cache.get_or_fetch(&key, TTL, fetch).await.unwrap();
        let (a, b) = tokio::join!(
            cache.get_or_fetch(&key, TTL, fetch),
            cache.get_or_fetch(&key, TTL, fetch)
        );

        assert_eq!((a, b), (Ok(9), Ok(9)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
