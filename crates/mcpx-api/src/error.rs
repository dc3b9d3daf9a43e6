//! API error types and conversions

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mcpx_core::ProxyError;
use serde_json::json;
use thiserror::Error;

/// API error type that converts to HTTP responses
#[derive(Debug, Error)]
pub enum ApiError {
    /// 400 Bad Request
    #[error("{0}")]
    BadRequest(String),
    /// 401 Unauthorized
    #[error("{0}")]
    Unauthorized(String),
    /// 404 Not Found
    #[error("{0}")]
    NotFound(String),
    /// 500 Internal Server Error
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable kind for the `error` field
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::NotFound(_) => "not_found",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(error = kind, %message, "Request failed");
        } else {
            tracing::debug!(error = kind, status = status.as_u16(), %message, "Request rejected");
        }

        (status, Json(json!({ "error": kind, "message": message }))).into_response()
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::Auth(msg) => ApiError::Unauthorized(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
