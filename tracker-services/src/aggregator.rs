//! Market Snapshot Aggregator
//!
//! Builds one consistent [`MarketSnapshot`] per broadcast tick by fanning out
//! cached per-symbol price lookups alongside the market overview lookup.
//!
//! Failure policy:
//! - A symbol whose fetch fails or outlives the fetch deadline is left out
//!   of the snapshot
//! - A failed overview is replaced by [`MarketOverview::fallback`]
//! - Only the snapshot deadline elapsing fails the whole build

use chrono::Utc;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use tracker_core::{
    AssetPrice, MarketDataProvider, MarketOverview, MarketSnapshot, UpstreamError, UpstreamResult,
};

use crate::cache::{CacheStats, TtlCache};

/// Singleton key for the overview cache
const OVERVIEW_KEY: &str = "market_overview";

/// How long cached entries stay fresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub price: Duration,
    pub overview: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            price: Duration::from_secs(3),
            overview: Duration::from_secs(30),
        }
    }
}

/// Configuration for the snapshot aggregator
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Symbols in broadcast order
    pub tracked_symbols: Vec<String>,
    pub ttls: CacheTtls,
    /// Upper bound on one upstream call (one symbol or the overview)
    ///
    /// Kept below `snapshot_timeout` so a slow key is excluded instead of
    /// failing the whole snapshot.
    pub fetch_timeout: Duration,
    /// Upper bound on building a single snapshot
    pub snapshot_timeout: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            tracked_symbols: [
                "BTC", "ETH", "BNB", "SOL", "XRP", "USDC", "ADA", "AVAX", "DOT", "MATIC",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            ttls: CacheTtls::default(),
            fetch_timeout: Duration::from_secs(12),
            snapshot_timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    #[error("Snapshot build exceeded {0:?}")]
    Timeout(Duration),
}

/// Cache hit/miss view for both caches
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct AggregatorCacheStats {
    pub prices: CacheStats,
    pub overview: CacheStats,
}

/// Produces market snapshots from a provider through the TTL caches
pub struct SnapshotAggregator {
    provider: Arc<dyn MarketDataProvider>,
    price_cache: TtlCache<String, AssetPrice>,
    overview_cache: TtlCache<&'static str, MarketOverview>,
    config: AggregatorConfig,
}

impl SnapshotAggregator {
    pub fn new(provider: Arc<dyn MarketDataProvider>, config: AggregatorConfig) -> Self {
        Self {
            provider,
            price_cache: TtlCache::new(),
            overview_cache: TtlCache::new(),
            config,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn tracked_symbols(&self) -> &[String] {
        &self.config.tracked_symbols
    }

    /// Symbols the underlying provider can price
    pub fn supported_symbols(&self) -> Vec<String> {
        self.provider.supported_symbols()
    }

    /// Cached price for one symbol, fetching on miss
    pub async fn price(&self, symbol: &str) -> UpstreamResult<AssetPrice> {
        let key = symbol.to_uppercase();
        self.price_cache
            .get_or_fetch(&key, self.config.ttls.price, || {
                with_deadline(self.config.fetch_timeout, self.provider.fetch_price(&key))
            })
            .await
    }

    /// Cached overview, falling back to the default one on failure
    ///
    /// The flag is `true` when the fallback was served.
    pub async fn overview(&self) -> (MarketOverview, bool) {
        let result = self
            .overview_cache
            .get_or_fetch(&OVERVIEW_KEY, self.config.ttls.overview, || {
                with_deadline(self.config.fetch_timeout, self.provider.fetch_overview())
            })
            .await;

        match result {
            Ok(overview) => (overview, false),
            Err(e) => {
                warn!("Market overview unavailable, serving fallback: {}", e);
                (MarketOverview::fallback(), true)
            }
        }
    }

    /// Snapshot over the configured tracked symbols
    pub async fn snapshot(&self) -> Result<MarketSnapshot, AggregationError> {
        self.build_snapshot(&self.config.tracked_symbols).await
    }

    /// Build a snapshot for `symbols`, preserving their order
    #[instrument(skip(self, symbols), fields(symbols = symbols.len()))]
    pub async fn build_snapshot(
        &self,
        symbols: &[String],
    ) -> Result<MarketSnapshot, AggregationError> {
        let build = async {
            let price_lookups = join_all(symbols.iter().map(|symbol| self.price(symbol)));
            let (results, (overview, overview_is_fallback)) =
                tokio::join!(price_lookups, self.overview());

            let prices: Vec<AssetPrice> = symbols
                .iter()
                .zip(results)
                .filter_map(|(symbol, result)| match result {
                    Ok(price) => Some(price),
                    Err(e) => {
                        warn!("Excluding {} from snapshot: {}", symbol, e);
                        None
                    }
                })
                .collect();

            debug!(
                "Built snapshot with {}/{} symbols",
                prices.len(),
                symbols.len()
            );

            MarketSnapshot {
                prices,
                overview,
                taken_at: Utc::now(),
                overview_is_fallback,
            }
        };

        tokio::time::timeout(self.config.snapshot_timeout, build)
            .await
            .map_err(|_| AggregationError::Timeout(self.config.snapshot_timeout))
    }

    pub fn cache_stats(&self) -> AggregatorCacheStats {
        AggregatorCacheStats {
            prices: self.price_cache.stats(),
            overview: self.overview_cache.stats(),
        }
    }

    /// Drop expired entries from both caches
    pub fn purge_expired(&self) -> usize {
        self.price_cache.purge_expired() + self.overview_cache.purge_expired()
    }
}

/// Bound one upstream call, reporting an overrun as [`UpstreamError::Timeout`]
async fn with_deadline<T>(
    deadline: Duration,
    fetch: impl Future<Output = UpstreamResult<T>>,
) -> UpstreamResult<T> {
    tokio::time::timeout(deadline, fetch)
        .await
        .unwrap_or(Err(UpstreamError::Timeout(deadline)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracker_core::{DataSource, MarketSentiment, UpstreamError};

    pub(crate) fn asset(symbol: &str, price: Decimal, change_24h: Decimal) -> AssetPrice {
        AssetPrice {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            price,
            change_24h,
            volume_24h: Decimal::ZERO,
            market_cap: Decimal::ZERO,
            high_24h: price,
            low_24h: price,
            unit: "USD".to_string(),
            data_source: DataSource::Synthetic,
            observed_at: Utc::now(),
        }
    }

    /// Scriptable provider for aggregator and loop tests
    #[derive(Default)]
    pub(crate) struct FakeProvider {
        pub prices: Mutex<HashMap<String, Decimal>>,
        pub failing: Mutex<HashSet<String>>,
        pub overview_fails: Mutex<bool>,
        pub delay: Mutex<Option<Duration>>,
        /// Extra latency for individual symbols
        pub slow: Mutex<HashMap<String, Duration>>,
        pub overview_delay: Mutex<Option<Duration>>,
        pub price_calls: AtomicUsize,
        pub overview_calls: AtomicUsize,
    }

    impl FakeProvider {
        pub(crate) fn with_prices(prices: &[(&str, Decimal)]) -> Self {
            let provider = Self::default();
            provider.set_prices(prices);
            provider
        }

        pub(crate) fn set_prices(&self, prices: &[(&str, Decimal)]) {
            *self.prices.lock() = prices
                .iter()
                .map(|(s, p)| (s.to_string(), *p))
                .collect();
        }

        pub(crate) fn fail_symbol(&self, symbol: &str) {
            self.failing.lock().insert(symbol.to_string());
        }

        pub(crate) fn slow_symbol(&self, symbol: &str, delay: Duration) {
            self.slow.lock().insert(symbol.to_string(), delay);
        }
    }

    #[async_trait]
    impl MarketDataProvider for FakeProvider {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn fetch_price(&self, symbol: &str) -> UpstreamResult<AssetPrice> {
            self.price_calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.slow.lock().get(symbol).copied().or(*self.delay.lock());
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.lock().contains(symbol) {
                return Err(UpstreamError::network("connection reset"));
            }
            let price = self.prices.lock().get(symbol).copied();
            price
                .map(|p| asset(symbol, p, Decimal::ZERO))
                .ok_or_else(|| UpstreamError::unsupported(symbol))
        }

        async fn fetch_overview(&self) -> UpstreamResult<MarketOverview> {
            self.overview_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.overview_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if *self.overview_fails.lock() {
                return Err(UpstreamError::api(429, "rate limited"));
            }
            let mut overview = MarketOverview::fallback();
            overview.fear_greed_index = 60;
            Ok(overview)
        }

        fn supported_symbols(&self) -> Vec<String> {
            self.prices.lock().keys().cloned().collect()
        }
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn aggregator(provider: Arc<FakeProvider>) -> SnapshotAggregator {
        SnapshotAggregator::new(provider, AggregatorConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_preserves_order() {
        let provider = Arc::new(FakeProvider::with_prices(&[
            ("BTC", Decimal::from(60000)),
            ("ETH", Decimal::from(3000)),
            ("SOL", Decimal::from(150)),
        ]));
        let aggregator = aggregator(provider);

        let snapshot = aggregator
            .build_snapshot(&symbols(&["SOL", "BTC", "ETH"]))
            .await
            .unwrap();

        let order: Vec<&str> = snapshot.symbols().collect();
        assert_eq!(order, vec!["SOL", "BTC", "ETH"]);
        assert!(!snapshot.overview_is_fallback);
        assert_eq!(snapshot.overview.fear_greed_index, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_symbol_excluded() {
        let provider = Arc::new(FakeProvider::with_prices(&[
            ("BTC", Decimal::from(60000)),
            ("ETH", Decimal::from(3000)),
            ("SOL", Decimal::from(150)),
        ]));
        provider.fail_symbol("ETH");
        let aggregator = aggregator(provider);

        let snapshot = aggregator
            .build_snapshot(&symbols(&["BTC", "ETH", "SOL"]))
            .await
            .unwrap();

        let order: Vec<&str> = snapshot.symbols().collect();
        assert_eq!(order, vec!["BTC", "SOL"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overview_failure_uses_fallback() {
        let provider = Arc::new(FakeProvider::with_prices(&[("BTC", Decimal::from(60000))]));
        *provider.overview_fails.lock() = true;
        let aggregator = aggregator(provider);

        let snapshot = aggregator
            .build_snapshot(&symbols(&["BTC"]))
            .await
            .unwrap();

        assert!(snapshot.overview_is_fallback);
        assert_eq!(snapshot.overview.fear_greed_index, 45);
        assert_eq!(snapshot.overview.market_sentiment, MarketSentiment::Neutral);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_symbols_failing_gives_empty_snapshot() {
        let provider = Arc::new(FakeProvider::default());
        let aggregator = aggregator(provider);

        let snapshot = aggregator
            .build_snapshot(&symbols(&["BTC", "ETH"]))
            .await
            .unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_prices_within_ttl() {
        let provider = Arc::new(FakeProvider::with_prices(&[("BTC", Decimal::from(60000))]));
        let aggregator = aggregator(Arc::clone(&provider));
        let tracked = symbols(&["BTC"]);

        aggregator.build_snapshot(&tracked).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        aggregator.build_snapshot(&tracked).await.unwrap();
        assert_eq!(provider.price_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.overview_calls.load(Ordering::SeqCst), 1);

        // Price TTL elapsed, overview TTL not yet
        tokio::time::advance(Duration::from_secs(3)).await;
        aggregator.build_snapshot(&tracked).await.unwrap();
        assert_eq!(provider.price_calls.load(Ordering::SeqCst), 2);
        assert_eq!(provider.overview_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_timeout() {
        let provider = Arc::new(FakeProvider::with_prices(&[("BTC", Decimal::from(60000))]));
        *provider.delay.lock() = Some(Duration::from_secs(60));
        let aggregator = SnapshotAggregator::new(
            provider,
            AggregatorConfig {
                snapshot_timeout: Duration::from_secs(5),
                ..AggregatorConfig::default()
            },
        );

        let err = aggregator
            .build_snapshot(&symbols(&["BTC"]))
            .await
            .unwrap_err();
        assert_eq!(err, AggregationError::Timeout(Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_symbol_excluded_not_fatal() {
        let provider = Arc::new(FakeProvider::with_prices(&[
            ("BTC", Decimal::from(60000)),
            ("ETH", Decimal::from(3000)),
            ("SOL", Decimal::from(150)),
        ]));
        provider.slow_symbol("ETH", Duration::from_secs(25));
        let aggregator = aggregator(provider);

        let start = tokio::time::Instant::now();
        let snapshot = aggregator
            .build_snapshot(&symbols(&["BTC", "ETH", "SOL"]))
            .await
            .unwrap();

        let order: Vec<&str> = snapshot.symbols().collect();
        assert_eq!(order, vec!["BTC", "SOL"]);
        // Cut off by the per-symbol deadline, well before the snapshot deadline
        assert!(start.elapsed() >= Duration::from_secs(12));
        assert!(start.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_symbol_times_out_as_upstream_error() {
        let provider = Arc::new(FakeProvider::with_prices(&[("ETH", Decimal::from(3000))]));
        provider.slow_symbol("ETH", Duration::from_secs(25));
        let aggregator = aggregator(provider);

        let err = aggregator.price("eth").await.unwrap_err();
        assert_eq!(err, UpstreamError::Timeout(Duration::from_secs(12)));
        assert_eq!(aggregator.cache_stats().prices.total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_overview_falls_back() {
        let provider = Arc::new(FakeProvider::with_prices(&[("BTC", Decimal::from(60000))]));
        *provider.overview_delay.lock() = Some(Duration::from_secs(40));
        let aggregator = aggregator(provider);

        let snapshot = aggregator
            .build_snapshot(&symbols(&["BTC"]))
            .await
            .unwrap();

        assert!(snapshot.overview_is_fallback);
        assert_eq!(snapshot.prices.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_snapshots_share_warm_cache() {
        let provider = Arc::new(FakeProvider::with_prices(&[
            ("BTC", Decimal::from(60000)),
            ("ETH", Decimal::from(3000)),
        ]));
        let aggregator = aggregator(Arc::clone(&provider));
        let tracked = symbols(&["BTC", "ETH"]);

        aggregator.build_snapshot(&tracked).await.unwrap();
        assert_eq!(provider.price_calls.load(Ordering::SeqCst), 2);

        let (first, second) = tokio::join!(
            aggregator.build_snapshot(&tracked),
            aggregator.build_snapshot(&tracked)
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(first.prices, second.prices);
        assert_eq!(provider.price_calls.load(Ordering::SeqCst), 2);
        assert_eq!(provider.overview_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_symbol_does_not_hold_up_cached_lookups() {
        let provider = Arc::new(FakeProvider::with_prices(&[
            ("BTC", Decimal::from(60000)),
            ("ETH", Decimal::from(3000)),
        ]));
        let aggregator = aggregator(Arc::clone(&provider));
        aggregator.price("BTC").await.unwrap();
        provider.slow_symbol("ETH", Duration::from_secs(5));

        let start = tokio::time::Instant::now();
        let (slow, fast) = tokio::join!(aggregator.price("ETH"), async {
            let price = aggregator.price("BTC").await;
            (price, start.elapsed())
        });

        assert!(slow.is_ok());
        assert!(fast.0.is_ok());
        assert_eq!(fast.1, Duration::ZERO);
    }
}
