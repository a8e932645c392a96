//! Market data structures for tracked crypto assets

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::UpstreamError;

/// Number of coins considered when deriving sentiment and trending lists
pub const OVERVIEW_TOP_COINS: usize = 5;

/// Where a price observation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Live CoinGecko quote
    #[serde(rename = "coingecko")]
    CoinGecko,
    /// Pegged stablecoin, never fetched upstream
    Stablecoin,
    /// Generated locally by the synthetic provider
    Synthetic,
}

/// Price observation for a single tracked asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetPrice {
    /// Ticker symbol (e.g., "BTC"), always upper case
    pub symbol: String,

    /// Human-readable name
    pub name: String,

    /// Spot price in USD
    pub price: Decimal,

    /// 24h change in percent
    pub change_24h: Decimal,

    /// 24h traded volume in USD
    pub volume_24h: Decimal,

    /// Market capitalisation in USD
    pub market_cap: Decimal,

    pub high_24h: Decimal,
    pub low_24h: Decimal,

    /// Quote currency
    pub unit: String,

    pub data_source: DataSource,

    /// When the provider observed this price
    #[serde(rename = "timestamp")]
    pub observed_at: DateTime<Utc>,
}

impl AssetPrice {
    /// Reject observations that break the price invariant
    pub fn validated(self) -> Result<Self, UpstreamError> {
        if self.price.is_sign_negative() {
            return Err(UpstreamError::parse(format!(
                "negative price {} for {}",
                self.price, self.symbol
            )));
        }
        Ok(self)
    }

    /// Relative price move from `previous` to `self`, in percent.
    ///
    /// Returns `None` when the previous price is zero.
    pub fn percent_change_from(&self, previous: &AssetPrice) -> Option<Decimal> {
        if previous.price.is_zero() {
            return None;
        }
        Some((self.price - previous.price).abs() / previous.price * Decimal::ONE_HUNDRED)
    }
}

/// Overall market sentiment derived from recent performance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketSentiment {
    Bullish,
    Neutral,
    Bearish,
}

/// Global totals reported by the data provider
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalMarketData {
    pub total_market_cap: Decimal,
    pub total_volume_24h: Decimal,
}

/// Aggregate view over the whole crypto market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOverview {
    pub total_market_cap: Decimal,
    pub total_volume_24h: Decimal,
    /// BTC share of total market cap, in percent
    pub bitcoin_dominance: Decimal,
    /// 0 (extreme fear) to 100 (extreme greed)
    pub fear_greed_index: u8,
    /// Top performers over 24h, best first
    pub trending_coins: Vec<String>,
    pub market_sentiment: MarketSentiment,
    pub last_updated: DateTime<Utc>,
}

impl MarketOverview {
    /// Default overview served when the provider cannot produce one
    pub fn fallback() -> Self {
        Self {
            total_market_cap: Decimal::from(2_500_000_000_000_i64),
            total_volume_24h: Decimal::from(50_000_000_000_i64),
            bitcoin_dominance: Decimal::new(525, 1),
            fear_greed_index: 45,
            trending_coins: ["BTC", "ETH", "BNB", "SOL", "ADA"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            market_sentiment: MarketSentiment::Neutral,
            last_updated: Utc::now(),
        }
    }

    /// Derive an overview from global totals and the top coins' prices
    ///
    /// Returns `None` if no top-coin prices are available.
    pub fn derive(global: &GlobalMarketData, top_coins: &[AssetPrice]) -> Option<Self> {
        if top_coins.is_empty() {
            return None;
        }

        let bitcoin_dominance = top_coins
            .iter()
            .find(|coin| coin.symbol == "BTC")
            .filter(|_| global.total_market_cap > Decimal::ZERO)
            .map(|btc| btc.market_cap / global.total_market_cap * Decimal::ONE_HUNDRED)
            .unwrap_or(Decimal::new(50, 0));

        let total_change: Decimal = top_coins.iter().map(|coin| coin.change_24h).sum();
        let avg_change = total_change / Decimal::from(top_coins.len());

        let (fear_greed_index, market_sentiment) = if avg_change > Decimal::new(5, 0) {
            (75, MarketSentiment::Bullish)
        } else if avg_change < Decimal::new(-5, 0) {
            (25, MarketSentiment::Bearish)
        } else {
            (50, MarketSentiment::Neutral)
        };

        let mut by_change: Vec<&AssetPrice> = top_coins.iter().collect();
        by_change.sort_by(|a, b| b.change_24h.cmp(&a.change_24h));
        let trending_coins = by_change
            .into_iter()
            .take(OVERVIEW_TOP_COINS)
            .map(|coin| coin.symbol.clone())
            .collect();

        Some(Self {
            total_market_cap: global.total_market_cap.round_dp(2),
            total_volume_24h: global.total_volume_24h.round_dp(2),
            bitcoin_dominance: bitcoin_dominance.round_dp(2),
            fear_greed_index,
            trending_coins,
            market_sentiment,
            last_updated: Utc::now(),
        })
    }
}

/// One consistent point-in-time view of all tracked assets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Prices in tracked-symbol configuration order
    pub prices: Vec<AssetPrice>,
    pub overview: MarketOverview,
    pub taken_at: DateTime<Utc>,
    /// Whether the overview is the fallback rather than provider data
    #[serde(skip)]
    pub overview_is_fallback: bool,
}

impl MarketSnapshot {
    /// A snapshot with no priced symbols has nothing worth broadcasting
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Find the price for a symbol
    pub fn price_of(&self, symbol: &str) -> Option<&AssetPrice> {
        self.prices.iter().find(|p| p.symbol == symbol)
    }

    /// Symbols priced in this snapshot, in order
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.prices.iter().map(|p| p.symbol.as_str())
    }
}
