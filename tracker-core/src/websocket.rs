//! WebSocket message types for real-time market data
//!
//! These types define the protocol for WebSocket communication between
//! the server and clients. Every message carries a `type` discriminator
//! and an ISO-8601 `timestamp`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MarketSnapshot;

// ============================================================================
// Client -> Server Messages
// ============================================================================

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ping to keep connection alive
    Ping,
    /// Ask for a snapshot outside the regular broadcast cadence
    RequestData,
    /// Subscribe to a set of symbols (acknowledged only)
    Subscribe {
        #[serde(default)]
        symbols: Option<Vec<String>>,
    },
}

impl ClientMessage {
    /// Parse an inbound text frame
    ///
    /// Returns an error if the text is not JSON at all, and `Ok(None)` for
    /// well-formed JSON that is not a message we understand.
    pub fn parse(text: &str) -> Result<Option<Self>, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Ok(serde_json::from_value(value).ok())
    }
}

// ============================================================================
// Server -> Client Messages
// ============================================================================

/// Health flag attached to connection and update messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Healthy,
    /// Serving fallback data for part of the snapshot
    Degraded,
}

impl ServerStatus {
    pub fn for_snapshot(snapshot: &MarketSnapshot) -> Self {
        if snapshot.overview_is_fallback {
            ServerStatus::Degraded
        } else {
            ServerStatus::Healthy
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First message on every connection
    ConnectionEstablished {
        client_id: String,
        server_status: ServerStatus,
        timestamp: DateTime<Utc>,
    },
    /// Snapshot sent right after the connection is established
    InitialData {
        data: MarketSnapshot,
        client_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Market snapshot, either broadcast or on request
    MarketUpdate {
        data: MarketSnapshot,
        server_status: ServerStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        active_connections: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
        /// Set when sent in response to `request_data`
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        requested: bool,
        timestamp: DateTime<Utc>,
    },
    /// Pong response to client ping
    Pong {
        client_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Pushed when the client has been silent for the keepalive timeout
    Keepalive { timestamp: DateTime<Utc> },
    /// Symbol subscription acknowledged
    SubscriptionConfirmed {
        symbols: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    /// Error message
    Error {
        code: ErrorCode,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ServerMessage {
    /// Broadcast envelope for a snapshot
    pub fn market_update(data: MarketSnapshot, active_connections: usize) -> Self {
        ServerMessage::MarketUpdate {
            server_status: ServerStatus::for_snapshot(&data),
            data,
            active_connections: Some(active_connections),
            client_id: None,
            requested: false,
            timestamp: Utc::now(),
        }
    }

    /// Reply to a single client's `request_data`
    pub fn requested_update(data: MarketSnapshot, client_id: String) -> Self {
        ServerMessage::MarketUpdate {
            server_status: ServerStatus::for_snapshot(&data),
            data,
            active_connections: None,
            client_id: Some(client_id),
            requested: true,
            timestamp: Utc::now(),
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn keepalive() -> Self {
        ServerMessage::Keepalive {
            timestamp: Utc::now(),
        }
    }

    /// The `type` discriminator as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::ConnectionEstablished { .. } => "connection_established",
            ServerMessage::InitialData { .. } => "initial_data",
            ServerMessage::MarketUpdate { .. } => "market_update",
            ServerMessage::Pong { .. } => "pong",
            ServerMessage::Keepalive { .. } => "keepalive",
            ServerMessage::SubscriptionConfirmed { .. } => "subscription_confirmed",
            ServerMessage::Error { .. } => "error",
        }
    }
}

/// Error codes for WebSocket errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Inbound frame was not valid JSON
    InvalidMessage,
    /// No market data could be produced
    DataUnavailable,
    /// Internal server error
    InternalError,
}
