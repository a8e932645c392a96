//! Core types for the Crypto Tracker streamer
//!
//! This crate defines the shared data structures used across the tracker,
//! including asset prices, market snapshots, the WebSocket protocol and the
//! data provider abstraction.

pub mod error;
pub mod market;
pub mod provider;
pub mod websocket;

pub use error::{TransportError, UpstreamError, UpstreamResult};
pub use market::{
    AssetPrice, DataSource, GlobalMarketData, MarketOverview, MarketSentiment, MarketSnapshot,
};
pub use provider::MarketDataProvider;
pub use websocket::{ClientMessage, ErrorCode, ServerMessage, ServerStatus};
