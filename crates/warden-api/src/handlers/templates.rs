//! Template handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};

use warden_devices::{DeviceConfiguration, DeviceTemplate, TemplateMatch, TemplateSpec};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListTemplatesQuery {
    pub organization_id: String,
}

/// POST /api/templates
pub async fn create_template_handler(
    State(state): State<AppState>,
    Json(spec): Json<TemplateSpec>,
) -> ApiResult<Json<DeviceTemplate>> {
    let template = state.registry.create_template(spec).await?;
    Ok(Json(template))
}

/// GET /api/templates?organization_id=...
pub async fn list_templates_handler(
    State(state): State<AppState>,
    Query(query): Query<ListTemplatesQuery>,
) -> Json<Value> {
    let templates = state.registry.list_templates(&query.organization_id).await;
    let count = templates.len();
    Json(json!({
        "templates": templates,
        "count": count,
    }))
}

/// DELETE /api/templates/:template_id
pub async fn delete_template_handler(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.registry.delete_template(&template_id).await?;
    Ok(Json(json!({ "deleted": template_id })))
}

/// POST /api/devices/:device_id/templates/:template_id
pub async fn apply_template_handler(
    State(state): State<AppState>,
    Path((device_id, template_id)): Path<(String, String)>,
) -> ApiResult<Json<DeviceConfiguration>> {
    let configuration = state.service.apply_template(&device_id, &template_id).await?;
    Ok(Json(configuration))
}

/// POST /api/devices/:device_id/templates/auto-apply
pub async fn auto_apply_template_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<TemplateMatch>> {
    let outcome = state.service.auto_apply_matching_template(&device_id).await?;
    Ok(Json(outcome))
}
