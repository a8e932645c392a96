//! Crypto Tracker API Server
//!
//! Streams cached CoinGecko market data to WebSocket clients and exposes a
//! small HTTP API over the same caches.

mod routes;

use axum::{
    http::{header, HeaderValue, Method},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tracker_coingecko::CoinGeckoClient;
use tracker_core::MarketDataProvider;
use tracker_services::{
    BroadcastLoop, ChangeDetector, DataSourceKind, LastBroadcast, LoopStateHandle,
    SnapshotAggregator, StreamerConfig, SubscriberRegistry, SyntheticProvider, WebSocketState,
};

/// How often expired cache entries are dropped
const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<SnapshotAggregator>,
    pub registry: Arc<SubscriberRegistry>,
    pub ws_state: Arc<WebSocketState>,
    /// Last snapshot pushed by the broadcast loop
    pub last_broadcast: LastBroadcast,
    pub loop_state: LoopStateHandle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env.local file
    if let Err(e) = dotenvy::from_filename(".env.local") {
        // Not an error if the file doesn't exist
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env.local: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,tracker_api=debug,tracker_services=debug")
            }),
        )
        .init();

    info!("Starting Crypto Tracker API");

    let config = StreamerConfig::from_env()?;

    let provider: Arc<dyn MarketDataProvider> = match config.data_source {
        DataSourceKind::CoinGecko => {
            let client = CoinGeckoClient::from_env();
            info!("Using CoinGecko at {}", client.base_url());
            Arc::new(client)
        }
        DataSourceKind::Synthetic => {
            info!("Using synthetic market data");
            Arc::new(SyntheticProvider::new())
        }
    };

    info!(
        "Tracking {} symbols: {}",
        config.aggregator.tracked_symbols.len(),
        config.aggregator.tracked_symbols.join(", ")
    );

    let aggregator = Arc::new(SnapshotAggregator::new(provider, config.aggregator.clone()));
    let registry = Arc::new(SubscriberRegistry::new());

    // Start the broadcast loop
    let broadcast_loop = BroadcastLoop::new(
        Arc::clone(&aggregator),
        Arc::clone(&registry),
        ChangeDetector::new(config.thresholds.clone()),
        config.broadcast,
    );
    let last_broadcast = broadcast_loop.last_broadcast();
    let loop_state = broadcast_loop.state_handle();
    broadcast_loop.spawn();

    // Periodically drop expired cache entries
    let aggregator_for_purge = Arc::clone(&aggregator);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            aggregator_for_purge.purge_expired();
        }
    });

    let ws_state = Arc::new(WebSocketState::new(
        Arc::clone(&registry),
        Arc::clone(&aggregator),
        last_broadcast.clone(),
        config.connection,
    ));

    // Create app state
    let state = AppState {
        aggregator,
        registry,
        ws_state,
        last_broadcast,
        loop_state,
    };

    // Configure CORS for frontend
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    let cors = match config.cors_origin.as_deref().map(HeaderValue::from_str) {
        Some(Ok(origin)) => cors.allow_origin(origin),
        Some(Err(e)) => {
            warn!("Ignoring invalid CORS_ORIGIN: {}", e);
            cors.allow_origin(Any)
        }
        None => cors.allow_origin(Any),
    };

    // Build router
    let app = Router::new()
        .nest("/api", routes::api_routes())
        .merge(routes::health_routes())
        .merge(routes::ws_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
