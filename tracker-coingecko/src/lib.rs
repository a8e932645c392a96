//! CoinGecko integration for the Crypto Tracker streamer
//!
//! This crate provides a client for the public CoinGecko v3 API, which
//! serves spot prices, 24h market charts and global market totals without
//! requiring authentication.
//!
//! Set `COINGECKO_BASE_URL` to point the client at a proxy or mirror.

pub mod client;
pub mod types;

pub use client::CoinGeckoClient;
pub use types::{coin_id, is_stablecoin, SUPPORTED_COINS};
