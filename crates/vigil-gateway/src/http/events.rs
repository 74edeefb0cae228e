//! Event ingest endpoint, POST /api/events.
//!
//! Producers (the task pipeline, the GPU sampler) post a bare payload,
//! `{"type": "task_update", "data": {...}}`. The gateway stamps it, folds it
//! into the dashboard store, and broadcasts it to every connected client.

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use vigil_core::VigilError;
use vigil_protocol::{Envelope, Kind, Payload};

use crate::app::AppState;
use crate::http::error_body;

/// POST /api/events
///
/// 202 once stored; `delivered` is false when the broadcast was shed because
/// the hub was saturated (clients catch up from their next snapshot).
/// 400 on malformed JSON or an unknown `type`, 422 for hub-internal kinds,
/// 503 once the hub has stopped.
pub async fn publish_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let payload: Payload = serde_json::from_slice(&body).map_err(|e| {
        warn!(bytes = body.len(), error = %e, "rejected event body");
        error_body(StatusCode::BAD_REQUEST, &VigilError::Serialization(e))
    })?;

    let kind = payload.kind();
    if matches!(kind, Kind::Ping | Kind::Pong | Kind::Initial) {
        warn!(%kind, "producers may not publish this kind");
        return Err(error_body(
            StatusCode::UNPROCESSABLE_ENTITY,
            &VigilError::UnknownEvent(kind.to_string()),
        ));
    }

    if !state.hub.is_running() {
        warn!(%kind, "hub stopped, refusing event");
        return Err(error_body(
            StatusCode::SERVICE_UNAVAILABLE,
            &VigilError::HubUnavailable("hub is shutting down".into()),
        ));
    }

    state.store.apply(&payload);
    let delivered = state.hub.broadcast(Envelope::new(payload));
    debug!(%kind, delivered, "event published");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"ok": true, "type": kind.as_str(), "delivered": delivered})),
    ))
}
