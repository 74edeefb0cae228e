use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use vigil_protocol::InitialSnapshot;

use crate::app::AppState;

#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub snapshot: InitialSnapshot,
    pub ws_clients: usize,
}

/// GET /api/status: the same view a client receives as `initial`.
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        snapshot: state.store.snapshot(),
        ws_clients: state.hub.client_count(),
    })
}

/// GET /api/clients: connected dashboard peers, oldest first.
pub async fn clients_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let peers = state.hub.peers().await;
    Json(json!({
        "count": peers.len(),
        "clients": peers,
    }))
}
