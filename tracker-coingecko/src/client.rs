//! CoinGecko API client
//!
//! Provides spot prices, 24h high/low and the global market overview for
//! the tracked coins.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use tracker_core::{
    AssetPrice, MarketDataProvider, MarketOverview, UpstreamError, UpstreamResult,
};

use crate::types::{
    coin_id, is_stablecoin, stablecoin_price, GlobalResponse, MarketChartResponse,
    SimplePriceResponse, COINGECKO_API_BASE, OVERVIEW_COINS, SUPPORTED_COINS,
};

/// Per-request timeout
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// CoinGecko API client
#[derive(Clone)]
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
}

impl CoinGeckoClient {
    /// Create a new client against the public API
    pub fn new() -> Self {
        Self::with_base_url(COINGECKO_API_BASE)
    }

    /// Create a new client against a custom base URL (proxy, mirror, test server)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create a client honouring `COINGECKO_BASE_URL` if set
    pub fn from_env() -> Self {
        match std::env::var("COINGECKO_BASE_URL") {
            Ok(url) if !url.is_empty() => Self::with_base_url(url),
            _ => Self::new(),
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET a JSON document, mapping transport, status and decode failures
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> UpstreamResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Fetching CoinGecko resource: {}", url);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                } else {
                    UpstreamError::network(format!("Failed to fetch {}: {}", path, e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::api(
                status.as_u16(),
                format!("CoinGecko API error: {}", body),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| UpstreamError::parse(format!("Failed to parse {} response: {}", path, e)))
    }

    /// Spot quotes for a batch of coin ids
    #[instrument(skip(self))]
    pub async fn simple_prices(&self, coin_ids: &[&str]) -> UpstreamResult<SimplePriceResponse> {
        let ids = coin_ids.join(",");
        self.get_json(
            "/simple/price",
            &[
                ("ids", ids.as_str()),
                ("vs_currencies", "usd"),
                ("include_24hr_change", "true"),
                ("include_24hr_vol", "true"),
                ("include_market_cap", "true"),
                ("include_last_updated_at", "true"),
            ],
        )
        .await
    }

    /// 24h high/low from the hourly market chart
    #[instrument(skip(self))]
    pub async fn high_low_24h(&self, coin_id: &str) -> UpstreamResult<Option<(f64, f64)>> {
        let chart: MarketChartResponse = self
            .get_json(
                &format!("/coins/{}/market_chart", coin_id),
                &[("vs_currency", "usd"), ("days", "1"), ("interval", "hourly")],
            )
            .await?;
        Ok(chart.high_low())
    }

    /// Global market totals
    #[instrument(skip(self))]
    pub async fn global(&self) -> UpstreamResult<GlobalResponse> {
        self.get_json("/global", &[]).await
    }
}

impl Default for CoinGeckoClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for CoinGeckoClient {
    fn name(&self) -> &'static str {
        "coingecko"
    }

    #[instrument(skip(self))]
    async fn fetch_price(&self, symbol: &str) -> UpstreamResult<AssetPrice> {
        if is_stablecoin(symbol) {
            return Ok(stablecoin_price(symbol));
        }

        let id = coin_id(symbol).ok_or_else(|| UpstreamError::unsupported(symbol))?;

        let ids = [id];
        let (quotes, high_low) = tokio::join!(self.simple_prices(&ids), self.high_low_24h(id));
        let quotes = quotes?;
        let quote = quotes.get(id).ok_or_else(|| UpstreamError::no_data(symbol))?;

        // High/low is best effort; the spot quote alone is still useful
        let high_low = match high_low {
            Ok(range) => range,
            Err(e) => {
                warn!("Failed to fetch 24h range for {}: {}", symbol, e);
                None
            }
        };

        quote.to_asset_price(symbol, id, high_low)
    }

    #[instrument(skip(self))]
    async fn fetch_overview(&self) -> UpstreamResult<MarketOverview> {
        let ids: Vec<&str> = OVERVIEW_COINS.iter().filter_map(|s| coin_id(s)).collect();

        let (global, quotes) = tokio::join!(self.global(), self.simple_prices(&ids));
        let global = global?.data.to_global_market_data()?;
        let quotes = quotes?;

        let top_coins: Vec<AssetPrice> = OVERVIEW_COINS
            .iter()
            .filter_map(|symbol| {
                let id = coin_id(symbol)?;
                let quote = quotes.get(id)?;
                match quote.to_asset_price(symbol, id, None) {
                    Ok(price) => Some(price),
                    Err(e) => {
                        warn!("Skipping {} in overview: {}", symbol, e);
                        None
                    }
                }
            })
            .collect();

        MarketOverview::derive(&global, &top_coins)
            .ok_or_else(|| UpstreamError::no_data("market overview"))
    }

    fn supported_symbols(&self) -> Vec<String> {
        SUPPORTED_COINS.iter().map(|(s, _)| s.to_string()).collect()
    }
}
