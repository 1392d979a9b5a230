//! Maps [`echogarden_core::error::ApiError`] to an HTTP status and JSON body
//! (spec.md §7): `invalid_input` → 400, `not_found` → 404, `unauthorized` →
//! 401, `conflict` → 409, `dependency_unavailable` → 503, `timeout` → 504,
//! `internal` → 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use echogarden_core::error::ApiError;
use serde_json::json;

pub struct ApiErrorResponse(pub ApiError);

impl<E: Into<ApiError>> From<E> for ApiErrorResponse {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            ApiError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ApiError::DependencyUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "dependency_unavailable"),
            ApiError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        (status, Json(json!({"code": code, "error": self.0.to_string()}))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiErrorResponse>;
