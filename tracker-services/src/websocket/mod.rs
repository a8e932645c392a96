//! WebSocket infrastructure for real-time market data
//!
//! This module provides the per-connection protocol handler and a
//! channel-backed socket for bridging transports into it.

mod bridge;
mod handler;

pub use bridge::{ChannelSocket, SocketPeer};
pub use handler::{ConnectionConfig, WebSocketState};
