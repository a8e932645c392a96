//! Price and market overview endpoints
//!
//! Served from the same caches the broadcast loop uses, so polling clients
//! never add upstream load within a TTL.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracker_core::{AssetPrice, MarketOverview, UpstreamError};
use tracing::{error, info, warn};

use crate::AppState;

/// Response for listing prices
#[derive(Debug, Serialize)]
pub struct PricesResponse {
    pub prices: Vec<AssetPrice>,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct OverviewResponse {
    #[serde(flatten)]
    pub overview: MarketOverview,
    /// Whether this is the default overview rather than live data
    pub fallback: bool,
}

#[derive(Debug, Serialize)]
pub struct SupportedResponse {
    pub supported: Vec<String>,
    pub tracked: Vec<String>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Create price routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/crypto/prices", get(list_prices))
        .route("/crypto/prices/{symbol}", get(get_price))
        .route("/crypto/supported", get(supported_symbols))
        .route("/market/overview", get(market_overview))
}

/// Prices for all tracked symbols
async fn list_prices(State(state): State<AppState>) -> impl IntoResponse {
    match state.aggregator.snapshot().await {
        Ok(snapshot) => {
            let count = snapshot.prices.len();
            info!("Returning {} prices", count);
            (
                StatusCode::OK,
                Json(PricesResponse {
                    prices: snapshot.prices,
                    count,
                    timestamp: snapshot.taken_at,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to build price list: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Price for a single symbol
async fn get_price(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    match state.aggregator.price(&symbol).await {
        Ok(price) => (StatusCode::OK, Json(price)).into_response(),
        Err(e @ UpstreamError::UnsupportedSymbol(_)) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            warn!("Failed to fetch price for {}: {}", symbol, e);
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn market_overview(State(state): State<AppState>) -> Json<OverviewResponse> {
    let (overview, fallback) = state.aggregator.overview().await;
    Json(OverviewResponse { overview, fallback })
}

async fn supported_symbols(State(state): State<AppState>) -> Json<SupportedResponse> {
    Json(SupportedResponse {
        supported: state.aggregator.supported_symbols(),
        tracked: state.aggregator.tracked_symbols().to_vec(),
    })
}
