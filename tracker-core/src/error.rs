//! Error types for the tracker

use std::time::Duration;

use thiserror::Error;

/// Failure of a single upstream fetch (one symbol or the overview)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpstreamError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported cryptocurrency: {0}")]
    UnsupportedSymbol(String),

    #[error("No data available for {0}")]
    NoData(String),

    #[error("Upstream call timed out after {0:?}")]
    Timeout(Duration),
}

impl UpstreamError {
    pub fn network(msg: impl Into<String>) -> Self {
        UpstreamError::Network(msg.into())
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        UpstreamError::Api {
            status,
            message: message.into(),
        }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        UpstreamError::Parse(msg.into())
    }

    pub fn unsupported(symbol: impl Into<String>) -> Self {
        UpstreamError::UnsupportedSymbol(symbol.into())
    }

    pub fn no_data(what: impl Into<String>) -> Self {
        UpstreamError::NoData(what.into())
    }
}

/// Result type alias for upstream operations
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Failure delivering a message to one subscriber
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection's outbound queue has been dropped
    #[error("Connection closed")]
    Closed,

    /// The connection is not draining its outbound queue
    #[error("Outbound queue full ({0} messages pending)")]
    Backpressure(usize),
}
