//! API route definitions

mod health;
mod prices;
pub mod ws;

use axum::Router;
use crate::AppState;

/// Create all API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(prices::routes())
        .merge(health::status_routes())
}

/// Health checks live at the root, outside `/api`
pub fn health_routes() -> Router<AppState> {
    health::routes()
}

/// Create WebSocket routes (separate from API)
pub fn ws_routes() -> Router<AppState> {
    ws::routes()
}
