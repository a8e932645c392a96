//! Health check and streaming status endpoints

use axum::{extract::State, response::Json, routing::get, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracker_core::ServerStatus;
use tracker_services::{AggregatorCacheStats, LoopState};

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: ServerStatus,
    data_source: &'static str,
    active_connections: usize,
    cache: AggregatorCacheStats,
    timestamp: DateTime<Utc>,
}

/// Streaming status response
#[derive(Debug, Serialize)]
struct WebSocketStatusResponse {
    active_connections: usize,
    /// When the last snapshot went out, if any has
    last_broadcast: Option<DateTime<Utc>>,
    server_status: ServerStatus,
    broadcast_state: LoopState,
    tracked_symbols: Vec<String>,
}

fn current_status(state: &AppState) -> ServerStatus {
    state
        .last_broadcast
        .get()
        .map(|snapshot| ServerStatus::for_snapshot(&snapshot))
        .unwrap_or(ServerStatus::Healthy)
}

/// Health check handler
///
/// Serving fallback data is reported in the body; the process itself is
/// still healthy, so the status code stays 200.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: current_status(&state),
        data_source: state.aggregator.provider_name(),
        active_connections: state.registry.len(),
        cache: state.aggregator.cache_stats(),
        timestamp: Utc::now(),
    })
}

/// Simple liveness check (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

async fn websocket_status(State(state): State<AppState>) -> Json<WebSocketStatusResponse> {
    Json(WebSocketStatusResponse {
        active_connections: state.ws_state.active_connections(),
        last_broadcast: state.last_broadcast.get().map(|snapshot| snapshot.taken_at),
        server_status: current_status(&state),
        broadcast_state: state.loop_state.get(),
        tracked_symbols: state.aggregator.tracked_symbols().to_vec(),
    })
}

/// Create health routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness))
}

/// Create streaming status routes
pub fn status_routes() -> Router<AppState> {
    Router::new().route("/websocket/status", get(websocket_status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{body::to_bytes, http::StatusCode, response::IntoResponse};
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tracker_core::{
        AssetPrice, MarketDataProvider, MarketOverview, UpstreamError, UpstreamResult,
    };
    use tracker_services::{
        AggregatorConfig, BroadcastLoop, ChangeDetector, ChannelSink, ConnectionConfig,
        LoopConfig, SnapshotAggregator, SubscriberRegistry, SyntheticProvider, WebSocketState,
    };

    /// Synthetic prices with the overview source down
    struct OverviewDown(SyntheticProvider);

    #[async_trait]
    impl MarketDataProvider for OverviewDown {
        fn name(&self) -> &'static str {
            "synthetic"
        }

        async fn fetch_price(&self, symbol: &str) -> UpstreamResult<AssetPrice> {
            self.0.fetch_price(symbol).await
        }

        async fn fetch_overview(&self) -> UpstreamResult<MarketOverview> {
            Err(UpstreamError::api(429, "rate limited"))
        }

        fn supported_symbols(&self) -> Vec<String> {
            self.0.supported_symbols()
        }
    }

    /// App state after one broadcast tick with a single connected client
    async fn state_after_tick(provider: Arc<dyn MarketDataProvider>) -> AppState {
        let aggregator = Arc::new(SnapshotAggregator::new(
            provider,
            AggregatorConfig::default(),
        ));
        let registry = Arc::new(SubscriberRegistry::new());
        let (tx, _rx) = mpsc::channel(16);
        registry.register(registry.new_client_id(), Arc::new(ChannelSink::new(tx)));

        let mut broadcast_loop = BroadcastLoop::new(
            Arc::clone(&aggregator),
            Arc::clone(&registry),
            ChangeDetector::default(),
            LoopConfig::default(),
        );
        broadcast_loop.tick().await;

        let last_broadcast = broadcast_loop.last_broadcast();
        let ws_state = Arc::new(WebSocketState::new(
            Arc::clone(&registry),
            Arc::clone(&aggregator),
            last_broadcast.clone(),
            ConnectionConfig::default(),
        ));

        AppState {
            aggregator,
            registry,
            ws_state,
            last_broadcast,
            loop_state: broadcast_loop.state_handle(),
        }
    }

    async fn json_body(response: axum::response::Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_degraded_still_ok() {
        let provider = Arc::new(OverviewDown(SyntheticProvider::with_seed(3)));
        let state = state_after_tick(provider).await;

        let (status, body) = json_body(health_check(State(state)).await.into_response()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["active_connections"], 1);
    }

    #[tokio::test]
    async fn test_health_healthy() {
        let provider = Arc::new(SyntheticProvider::with_seed(3));
        let state = state_after_tick(provider).await;

        let (status, body) = json_body(health_check(State(state)).await.into_response()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["data_source"], "synthetic");
    }

    #[tokio::test]
    async fn test_websocket_status_reports_loop_state() {
        let provider = Arc::new(SyntheticProvider::with_seed(3));
        let state = state_after_tick(provider).await;

        let (status, body) =
            json_body(websocket_status(State(state)).await.into_response()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["broadcast_state"], "active");
        assert_eq!(body["active_connections"], 1);
        assert!(body["last_broadcast"].is_string());
    }
}
