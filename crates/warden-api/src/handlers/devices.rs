//! Device CRUD and command handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};

use warden_devices::{CommandRequest, Device, DeviceSpec, DeviceUpdate};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListDevicesQuery {
    pub organization_id: Option<String>,
}

/// POST /api/devices
pub async fn create_device_handler(
    State(state): State<AppState>,
    Json(spec): Json<DeviceSpec>,
) -> ApiResult<Json<Device>> {
    let device = state.registry.register_device(spec).await?;
    Ok(Json(device))
}

/// GET /api/devices
pub async fn list_devices_handler(
    State(state): State<AppState>,
    Query(query): Query<ListDevicesQuery>,
) -> Json<Value> {
    let devices = match query.organization_id {
        Some(organization_id) => {
            state
                .registry
                .list_devices_by_organization(&organization_id)
                .await
        }
        None => state.registry.list_devices().await,
    };
    let count = devices.len();
    Json(json!({
        "devices": devices,
        "count": count,
    }))
}

/// GET /api/devices/:device_id
pub async fn get_device_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<Device>> {
    let device = state.registry.require_device(&device_id).await?;
    Ok(Json(device))
}

/// PUT /api/devices/:device_id
pub async fn update_device_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(update): Json<DeviceUpdate>,
) -> ApiResult<Json<Device>> {
    let device = state.registry.update_device(&device_id, update).await?;
    Ok(Json(device))
}

/// DELETE /api/devices/:device_id
pub async fn delete_device_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.registry.delete_device(&device_id).await?;
    Ok(Json(json!({ "deleted": device_id })))
}

/// POST /api/devices/:device_id/test-connection
pub async fn test_connection_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let reachable = state.service.test_connection(&device_id).await?;
    Ok(Json(json!({ "device_id": device_id, "reachable": reachable })))
}

/// POST /api/devices/:device_id/commands
pub async fn send_command_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(request): Json<CommandRequest>,
) -> ApiResult<Json<Value>> {
    let outcome = state.service.execute_command(&device_id, request).await?;
    Ok(Json(serde_json::to_value(outcome).map_err(warden_core::Error::from)?))
}

/// GET /api/devices/:device_id/health
pub async fn device_health_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let health = state.service.probe_health(&device_id).await?;
    Ok(Json(serde_json::to_value(health).map_err(warden_core::Error::from)?))
}

/// GET /api/devices/:device_id/info
pub async fn device_info_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let info = state.service.device_info(&device_id).await?;
    Ok(Json(serde_json::to_value(info).map_err(warden_core::Error::from)?))
}

/// POST /api/devices/discover
pub async fn discover_devices_handler(State(state): State<AppState>) -> Json<Value> {
    let discovered = state.service.discover_devices().await;
    let devices: Vec<Value> = discovered
        .into_iter()
        .map(|(kind, info)| {
            json!({
                "adapter": kind.as_str(),
                "info": info,
            })
        })
        .collect();
    Json(json!({
        "discovered": devices,
    }))
}
