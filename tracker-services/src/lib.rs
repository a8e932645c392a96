//! Streaming services for the Crypto Tracker
//!
//! This crate provides the service layer between the data providers and
//! connected WebSocket clients: TTL caching, snapshot aggregation, change
//! detection, the subscriber registry and the adaptive broadcast loop.

pub mod aggregator;
pub mod broadcaster;
pub mod cache;
pub mod change_detector;
pub mod config;
pub mod registry;
pub mod synthetic;
pub mod websocket;

pub use aggregator::{
    AggregationError, AggregatorCacheStats, AggregatorConfig, CacheTtls, SnapshotAggregator,
};
pub use broadcaster::{
    BroadcastLoop, FailureBackoff, LastBroadcast, LoopConfig, LoopState, LoopStateHandle,
};
pub use cache::{CacheStats, TtlCache};
pub use change_detector::{BroadcastReason, ChangeDetector, ChangeThresholds};
pub use config::{ConfigError, DataSourceKind, StreamerConfig};
pub use registry::{BroadcastReport, ChannelSink, ClientId, MessageSink, SubscriberRegistry};
pub use synthetic::SyntheticProvider;
pub use websocket::{ChannelSocket, ConnectionConfig, SocketPeer, WebSocketState};
