use axum::{http::StatusCode, Json};
use serde_json::{json, Value};
use vigil_core::VigilError;

pub mod events;
pub mod health;
pub mod status;

/// `{"error": CODE, "message": ...}` with the given status.
pub fn error_body(status: StatusCode, err: &VigilError) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({"error": err.code(), "message": err.to_string()})),
    )
}
