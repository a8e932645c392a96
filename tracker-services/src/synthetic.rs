//! Synthetic market data provider
//!
//! Generates plausible quotes locally with a bounded random walk per coin,
//! for development and demos without hitting CoinGecko rate limits.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracker_coingecko::is_stablecoin;
use tracker_coingecko::types::OVERVIEW_COINS;
use tracker_core::{
    AssetPrice, DataSource, GlobalMarketData, MarketDataProvider, MarketOverview, UpstreamError,
    UpstreamResult,
};

/// Static profile of a simulated coin
struct CoinProfile {
    symbol: &'static str,
    name: &'static str,
    base_price: f64,
    volume_24h: f64,
    market_cap: f64,
    /// Max per-step move, in percent
    step_pct: f64,
}

const fn coin(
    symbol: &'static str,
    name: &'static str,
    base_price: f64,
    volume_24h: f64,
    market_cap: f64,
    step_pct: f64,
) -> CoinProfile {
    CoinProfile {
        symbol,
        name,
        base_price,
        volume_24h,
        market_cap,
        step_pct,
    }
}

const PROFILES: &[CoinProfile] = &[
    coin("BTC", "Bitcoin", 43250.75, 25.0e9, 847.0e9, 0.08),
    coin("ETH", "Ethereum", 2650.85, 12.0e9, 318.0e9, 0.10),
    coin("BNB", "Binance Coin", 315.25, 0.8e9, 47.0e9, 0.10),
    coin("SOL", "Solana", 98.45, 2.5e9, 42.0e9, 0.20),
    coin("XRP", "XRP", 0.6125, 1.8e9, 33.0e9, 0.15),
    coin("ADA", "Cardano", 0.485, 0.65e9, 17.0e9, 0.15),
    coin("AVAX", "Avalanche", 37.82, 0.5e9, 14.0e9, 0.20),
    coin("DOT", "Polkadot", 7.25, 0.35e9, 9.5e9, 0.15),
    coin("MATIC", "Polygon", 0.825, 0.42e9, 7.8e9, 0.20),
    coin("LINK", "Chainlink", 14.65, 0.28e9, 8.6e9, 0.15),
    coin("UNI", "Uniswap", 6.85, 0.18e9, 5.2e9, 0.15),
    coin("LTC", "Litecoin", 73.15, 0.45e9, 5.4e9, 0.12),
    coin("BCH", "Bitcoin Cash", 245.80, 0.32e9, 4.8e9, 0.12),
    coin("ATOM", "Cosmos", 9.85, 0.095e9, 3.8e9, 0.15),
    coin("ETC", "Ethereum Classic", 20.45, 0.085e9, 3.0e9, 0.15),
    coin("USDC", "USD Coin", 1.0, 4.2e9, 24.5e9, 0.0),
    coin("USDT", "Tether", 1.0, 28.0e9, 91.0e9, 0.0),
    coin("DAI", "Dai", 1.0, 0.18e9, 5.3e9, 0.0),
];

/// Tracked coins make up roughly this share of the whole market
const TRACKED_MARKET_SHARE: f64 = 0.8;

/// Bound on the simulated 24h change, in percent
const MAX_DAILY_CHANGE: f64 = 15.0;

fn profile(symbol: &str) -> Option<&'static CoinProfile> {
    PROFILES.iter().find(|p| p.symbol == symbol)
}

fn to_decimal(value: f64, field: &str) -> UpstreamResult<Decimal> {
    Decimal::try_from(value)
        .map_err(|e| UpstreamError::parse(format!("Invalid synthetic {} {}: {}", field, value, e)))
}

/// Current walk position for one coin
#[derive(Debug, Clone, Copy)]
struct WalkState {
    price: f64,
    change_24h: f64,
    high: f64,
    low: f64,
}

struct SyntheticState {
    rng: StdRng,
    coins: HashMap<&'static str, WalkState>,
}

impl SyntheticState {
    fn step(&mut self, profile: &CoinProfile) -> WalkState {
        let rng = &mut self.rng;
        let walk = self.coins.entry(profile.symbol).or_insert_with(|| WalkState {
            price: profile.base_price,
            change_24h: 0.0,
            high: profile.base_price,
            low: profile.base_price,
        });

        if is_stablecoin(profile.symbol) {
            walk.price = 1.0 + rng.random_range(-0.0005..=0.0005);
            walk.change_24h = rng.random_range(-0.05..=0.05);
        } else {
            let step = rng.random_range(-profile.step_pct..=profile.step_pct);
            walk.price *= 1.0 + step / 100.0;
            walk.change_24h = (walk.change_24h + step).clamp(-MAX_DAILY_CHANGE, MAX_DAILY_CHANGE);
        }
        walk.high = walk.high.max(walk.price);
        walk.low = walk.low.min(walk.price);
        *walk
    }
}

/// Random-walk provider over the supported coins
pub struct SyntheticProvider {
    state: Mutex<SyntheticState>,
}

impl SyntheticProvider {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    /// Deterministic sequence for a given seed
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            state: Mutex::new(SyntheticState {
                rng,
                coins: HashMap::new(),
            }),
        }
    }

    fn quote(&self, symbol: &str) -> UpstreamResult<AssetPrice> {
        let symbol = symbol.to_uppercase();
        let profile = profile(&symbol).ok_or_else(|| UpstreamError::unsupported(&symbol))?;
        let walk = self.state.lock().step(profile);

        // Volume and market cap scale with the price
        let scale = walk.price / profile.base_price;

        AssetPrice {
            name: profile.name.to_string(),
            price: to_decimal(walk.price, "price")?.round_dp(4),
            change_24h: to_decimal(walk.change_24h, "change_24h")?.round_dp(2),
            volume_24h: to_decimal(profile.volume_24h * scale, "volume_24h")?.round_dp(0),
            market_cap: to_decimal(profile.market_cap * scale, "market_cap")?.round_dp(0),
            high_24h: to_decimal(walk.high, "high_24h")?.round_dp(4),
            low_24h: to_decimal(walk.low, "low_24h")?.round_dp(4),
            unit: "USD".to_string(),
            data_source: DataSource::Synthetic,
            observed_at: Utc::now(),
            symbol,
        }
        .validated()
    }
}

impl Default for SyntheticProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for SyntheticProvider {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    async fn fetch_price(&self, symbol: &str) -> UpstreamResult<AssetPrice> {
        self.quote(symbol)
    }

    async fn fetch_overview(&self) -> UpstreamResult<MarketOverview> {
        let top_coins = OVERVIEW_COINS
            .iter()
            .map(|symbol| self.quote(symbol))
            .collect::<UpstreamResult<Vec<_>>>()?;

        let tracked_cap: f64 = PROFILES.iter().map(|p| p.market_cap).sum();
        let tracked_volume: f64 = PROFILES.iter().map(|p| p.volume_24h).sum();
        let global = GlobalMarketData {
            total_market_cap: to_decimal(tracked_cap / TRACKED_MARKET_SHARE, "total_market_cap")?,
            total_volume_24h: to_decimal(tracked_volume / TRACKED_MARKET_SHARE, "total_volume")?,
        };

        MarketOverview::derive(&global, &top_coins)
            .ok_or_else(|| UpstreamError::no_data("market overview"))
    }

    fn supported_symbols(&self) -> Vec<String> {
        PROFILES.iter().map(|p| p.symbol.to_string()).collect()
    }
}
