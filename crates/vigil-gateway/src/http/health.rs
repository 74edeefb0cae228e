use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: unauthenticated liveness probe with build metadata.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "commit": env!("VIGIL_GIT_SHA"),
        "uptime_secs": state.store.uptime_secs(),
        "ws_clients": state.hub.client_count(),
    }))
}
