//! CoinGecko API response types
//!
//! These types mirror the CoinGecko v3 API responses and are converted
//! to tracker-core types for use in the application.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracker_core::{AssetPrice, DataSource, GlobalMarketData, UpstreamError, UpstreamResult};

/// Base URL for the public CoinGecko API
pub const COINGECKO_API_BASE: &str = "https://api.coingecko.com/api/v3";

/// Supported symbols and their CoinGecko coin ids
pub const SUPPORTED_COINS: &[(&str, &str)] = &[
    ("BTC", "bitcoin"),
    ("ETH", "ethereum"),
    ("BNB", "binancecoin"),
    ("SOL", "solana"),
    ("ADA", "cardano"),
    ("XRP", "ripple"),
    ("AVAX", "avalanche-2"),
    ("DOT", "polkadot"),
    ("MATIC", "matic-network"),
    ("LINK", "chainlink"),
    ("UNI", "uniswap"),
    ("LTC", "litecoin"),
    ("BCH", "bitcoin-cash"),
    ("ATOM", "cosmos"),
    ("ETC", "ethereum-classic"),
    ("USDC", "usd-coin"),
    ("USDT", "tether"),
    ("DAI", "dai"),
];

/// Stablecoins are pegged to 1 USD and never fetched upstream
const STABLECOINS: &[&str] = &["USDC", "USDT", "DAI"];

/// Coins used to derive the market overview
pub const OVERVIEW_COINS: &[&str] = &["BTC", "ETH", "BNB", "SOL", "ADA"];

/// Look up the CoinGecko id for a symbol (case-insensitive)
pub fn coin_id(symbol: &str) -> Option<&'static str> {
    let symbol = symbol.to_uppercase();
    SUPPORTED_COINS
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|(_, id)| *id)
}

pub fn is_stablecoin(symbol: &str) -> bool {
    STABLECOINS.contains(&symbol.to_uppercase().as_str())
}

/// "bitcoin-cash" -> "Bitcoin Cash"
fn display_name(coin_id: &str) -> String {
    coin_id
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn to_decimal(value: f64, field: &str) -> UpstreamResult<Decimal> {
    Decimal::try_from(value)
        .map_err(|e| UpstreamError::parse(format!("Invalid {} value {}: {}", field, value, e)))
}

/// Synthesized quote for a pegged stablecoin
pub fn stablecoin_price(symbol: &str) -> AssetPrice {
    let symbol = symbol.to_uppercase();
    AssetPrice {
        name: format!("{} Stablecoin", symbol),
        symbol,
        price: Decimal::ONE,
        change_24h: Decimal::ZERO,
        volume_24h: Decimal::from(1_000_000_000_i64),
        market_cap: Decimal::from(10_000_000_000_i64),
        high_24h: Decimal::new(101, 2),
        low_24h: Decimal::new(99, 2),
        unit: "USD".to_string(),
        data_source: DataSource::Stablecoin,
        observed_at: Utc::now(),
    }
}

/// One entry of a `/simple/price` response
#[derive(Debug, Clone, Deserialize)]
pub struct SimplePriceQuote {
    pub usd: f64,
    #[serde(default)]
    pub usd_24h_change: Option<f64>,
    #[serde(default)]
    pub usd_24h_vol: Option<f64>,
    #[serde(default)]
    pub usd_market_cap: Option<f64>,
    /// Unix seconds
    #[serde(default)]
    pub last_updated_at: Option<i64>,
}

/// `/simple/price` response keyed by coin id
pub type SimplePriceResponse = HashMap<String, SimplePriceQuote>;

impl SimplePriceQuote {
    /// Convert to an [`AssetPrice`], using the spot price for missing high/low
    pub fn to_asset_price(
        &self,
        symbol: &str,
        coin_id: &str,
        high_low: Option<(f64, f64)>,
    ) -> UpstreamResult<AssetPrice> {
        let (high, low) = high_low.unwrap_or((self.usd, self.usd));

        let observed_at = self
            .last_updated_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(Utc::now);

        AssetPrice {
            symbol: symbol.to_uppercase(),
            name: display_name(coin_id),
            price: to_decimal(self.usd, "price")?.round_dp(4),
            change_24h: to_decimal(self.usd_24h_change.unwrap_or(0.0), "change_24h")?.round_dp(2),
            volume_24h: to_decimal(self.usd_24h_vol.unwrap_or(0.0), "volume_24h")?.round_dp(2),
            market_cap: to_decimal(self.usd_market_cap.unwrap_or(0.0), "market_cap")?.round_dp(2),
            high_24h: to_decimal(high, "high_24h")?.round_dp(4),
            low_24h: to_decimal(low, "low_24h")?.round_dp(4),
            unit: "USD".to_string(),
            data_source: DataSource::CoinGecko,
            observed_at,
        }
        .validated()
    }
}

/// `/coins/{id}/market_chart` response
#[derive(Debug, Clone, Deserialize)]
pub struct MarketChartResponse {
    /// `[timestamp_ms, price]` pairs
    #[serde(default)]
    pub prices: Vec<[f64; 2]>,
}

impl MarketChartResponse {
    /// Highest and lowest price in the chart
    pub fn high_low(&self) -> Option<(f64, f64)> {
        let mut points = self.prices.iter().map(|[_, price]| *price);
        let first = points.next()?;
        Some(points.fold((first, first), |(high, low), p| (high.max(p), low.min(p))))
    }
}

/// `/global` response
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalResponse {
    pub data: GlobalData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlobalData {
    #[serde(default)]
    pub total_market_cap: HashMap<String, f64>,
    #[serde(default)]
    pub total_volume: HashMap<String, f64>,
}

impl GlobalData {
    pub fn to_global_market_data(&self) -> UpstreamResult<GlobalMarketData> {
        let usd = |map: &HashMap<String, f64>| map.get("usd").copied().unwrap_or(0.0);
        Ok(GlobalMarketData {
            total_market_cap: to_decimal(usd(&self.total_market_cap), "total_market_cap")?,
            total_volume_24h: to_decimal(usd(&self.total_volume), "total_volume")?,
        })
    }
}
