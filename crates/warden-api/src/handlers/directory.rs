//! Employee directory intake.
//!
//! The surrounding product owns employees; this endpoint is the seam
//! through which it feeds records into the engine's directory view.

use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Value, json};

use warden_sync::Employee;

use crate::state::AppState;

/// PUT /api/directory/employees
pub async fn upsert_employee_handler(
    State(state): State<AppState>,
    Json(employee): Json<Employee>,
) -> Json<Value> {
    let employee_id = employee.employee_id.clone();
    state.directory.insert(employee).await;
    Json(json!({ "upserted": employee_id }))
}

/// DELETE /api/directory/employees/:employee_id
pub async fn remove_employee_handler(
    State(state): State<AppState>,
    Path(employee_id): Path<String>,
) -> Json<Value> {
    state.directory.remove(&employee_id).await;
    Json(json!({ "removed": employee_id }))
}
