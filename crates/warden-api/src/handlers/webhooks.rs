//! Webhook registration handlers (management surface, not ingestion).

use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Value, json};

use warden_devices::{DeviceWebhook, WebhookSpec};

use crate::error::ApiResult;
use crate::state::AppState;

/// POST /api/devices/:device_id/webhooks
pub async fn configure_webhook_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(spec): Json<WebhookSpec>,
) -> ApiResult<Json<DeviceWebhook>> {
    let webhook = state.service.configure_webhook(&device_id, spec).await?;
    Ok(Json(webhook))
}

/// GET /api/devices/:device_id/webhooks
pub async fn list_webhooks_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.registry.require_device(&device_id).await?;
    let webhooks = state.registry.list_webhooks(&device_id).await;
    let count = webhooks.len();
    Ok(Json(json!({
        "webhooks": webhooks,
        "count": count,
    })))
}

/// DELETE /api/devices/:device_id/webhooks/:host_id
pub async fn remove_webhook_handler(
    State(state): State<AppState>,
    Path((device_id, host_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    state.service.remove_webhook(&device_id, &host_id).await?;
    Ok(Json(json!({ "deactivated": host_id })))
}
