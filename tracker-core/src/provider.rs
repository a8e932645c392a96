//! Data provider abstraction
//!
//! The streamer never talks to a pricing source directly; everything goes
//! through this trait so the live client and the synthetic generator are
//! interchangeable.

use async_trait::async_trait;

use crate::error::UpstreamResult;
use crate::market::{AssetPrice, MarketOverview};

/// Source of price and overview data
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Fetch the current price for one symbol
    async fn fetch_price(&self, symbol: &str) -> UpstreamResult<AssetPrice>;

    /// Fetch the market-wide overview
    async fn fetch_overview(&self) -> UpstreamResult<MarketOverview>;

    /// Symbols this provider can price
    fn supported_symbols(&self) -> Vec<String>;
}
