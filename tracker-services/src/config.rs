//! Streamer configuration
//!
//! Everything is read from environment variables; unset variables fall back
//! to the defaults of the individual config structs.

use std::collections::HashSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::aggregator::{AggregatorConfig, CacheTtls};
use crate::broadcaster::LoopConfig;
use crate::change_detector::ChangeThresholds;
use crate::websocket::ConnectionConfig;

const DEFAULT_PORT: u16 = 3001;

/// Which provider backs the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSourceKind {
    CoinGecko,
    Synthetic,
}

impl FromStr for DataSourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "coingecko" => Ok(DataSourceKind::CoinGecko),
            "synthetic" => Ok(DataSourceKind::Synthetic),
            other => Err(ConfigError::InvalidValue {
                field: "DATA_SOURCE".to_string(),
                error: format!("unknown data source '{}'", other),
            }),
        }
    }
}

/// Complete runtime configuration
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    pub port: u16,
    pub data_source: DataSourceKind,
    /// Allowed CORS origin; any origin when unset
    pub cors_origin: Option<String>,
    pub aggregator: AggregatorConfig,
    pub thresholds: ChangeThresholds,
    pub broadcast: LoopConfig,
    pub connection: ConnectionConfig,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_source: DataSourceKind::CoinGecko,
            cors_origin: None,
            aggregator: AggregatorConfig::default(),
            thresholds: ChangeThresholds::default(),
            broadcast: LoopConfig::default(),
            connection: ConnectionConfig::default(),
        }
    }
}

impl StreamerConfig {
    /// Load configuration from environment variables
    ///
    /// Reads:
    /// - SERVER_PORT: HTTP listen port
    /// - DATA_SOURCE: `coingecko` or `synthetic`
    /// - TRACKED_SYMBOLS: comma-separated symbols, in broadcast order
    /// - MAJOR_SYMBOLS: comma-separated symbols held to the tighter move threshold
    /// - PRICE_CACHE_TTL_SECS / OVERVIEW_CACHE_TTL_SECS
    /// - CORS_ORIGIN
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(port) = var("SERVER_PORT") {
            config.port = parse_number("SERVER_PORT", &port)?;
        }

        if let Some(source) = var("DATA_SOURCE") {
            config.data_source = source.parse()?;
        }

        config.cors_origin = var("CORS_ORIGIN");

        if let Some(symbols) = var("TRACKED_SYMBOLS") {
            config.aggregator.tracked_symbols = parse_symbols("TRACKED_SYMBOLS", &symbols)?;
        }

        if let Some(symbols) = var("MAJOR_SYMBOLS") {
            config.thresholds.major_symbols = parse_symbols("MAJOR_SYMBOLS", &symbols)?
                .into_iter()
                .collect::<HashSet<_>>();
        }

        let mut ttls = CacheTtls::default();
        if let Some(secs) = var("PRICE_CACHE_TTL_SECS") {
            ttls.price = Duration::from_secs(parse_number("PRICE_CACHE_TTL_SECS", &secs)?);
        }
        if let Some(secs) = var("OVERVIEW_CACHE_TTL_SECS") {
            ttls.overview = Duration::from_secs(parse_number("OVERVIEW_CACHE_TTL_SECS", &secs)?);
        }
        config.aggregator.ttls = ttls;

        Ok(config)
    }
}

fn parse_number<T>(field: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            field: field.to_string(),
            error: e.to_string(),
        })
}

/// "btc, eth" -> ["BTC", "ETH"], keeping order and dropping duplicates
fn parse_symbols(field: &str, value: &str) -> Result<Vec<String>, ConfigError> {
    let mut seen = HashSet::new();
    let symbols: Vec<String> = value
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect();

    if symbols.is_empty() {
        return Err(ConfigError::EmptySymbolList(field.to_string()));
    }
    Ok(symbols)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {error}")]
    InvalidValue { field: String, error: String },

    #[error("{0} cannot be empty")]
    EmptySymbolList(String),
}
