//! HTTP error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use warden_core::Error;

/// Wrapper turning engine errors into JSON error responses.
///
/// Validation, conflict and not-found errors surface as 4xx; everything
/// else is a 500 with the message preserved for operators. The webhook
/// endpoint never goes through this type — it answers 200 regardless.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Inactive(_) => StatusCode::CONFLICT,
            Error::Connectivity(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

/// Handler result alias.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
