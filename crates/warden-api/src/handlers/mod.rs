//! Request handlers.

pub mod devices;
pub mod directory;
pub mod sync;
pub mod templates;
pub mod webhook_events;
pub mod webhooks;

use axum::Json;
use serde_json::{Value, json};

/// Liveness probe.
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
    }))
}
