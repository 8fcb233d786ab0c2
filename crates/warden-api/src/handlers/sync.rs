//! Reconciliation handlers.

use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;

use warden_sync::{DesiredSet, RetryReport, SyncOptions, SyncReport, SyncStatusSummary};

use crate::error::ApiResult;
use crate::state::AppState;

/// Body of a sync request: the desired set scope plus pass options, flat.
///
/// ```json
/// { "scope": "employees", "ids": ["e1"], "remove_missing": true }
/// ```
#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    #[serde(flatten)]
    pub desired: DesiredSet,
    #[serde(flatten)]
    pub options: SyncOptions,
}

/// POST /api/devices/:device_id/sync
pub async fn sync_employees_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(request): Json<SyncRequest>,
) -> ApiResult<Json<SyncReport>> {
    let report = state
        .engine
        .sync_employees(&device_id, request.desired, request.options)
        .await?;
    Ok(Json(report))
}

/// POST /api/devices/:device_id/sync/retry
pub async fn retry_failed_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<RetryReport>> {
    let report = state.engine.retry_failed(&device_id).await?;
    Ok(Json(report))
}

/// GET /api/devices/:device_id/sync
pub async fn sync_status_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<SyncStatusSummary>> {
    let summary = state.engine.sync_status(&device_id).await?;
    Ok(Json(summary))
}
