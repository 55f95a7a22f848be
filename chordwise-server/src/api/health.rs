//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde_json::json;

use crate::AppState;

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let uptime_seconds = (Utc::now() - state.startup_time).num_seconds().max(0);
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime_seconds,
        "active_connections": state.registry.connection_count().await,
        "active_monitors": state.registry.monitor_count().await,
    }))
}

/// Build health routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/api/health", get(health))
}
