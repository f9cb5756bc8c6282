//! Error response formatting
//!
//! Every response body is an envelope: `{ success, data?, error? }`.
//! Failures add the machine-readable code, request id and a retry hint.

use crate::error::{AppError, ErrorCode};
use crate::middleware::logging::current_request_id;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Standardized error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false
    pub success: bool,

    /// Human-readable error message
    pub error: String,

    /// Machine-readable error code
    pub code: ErrorCode,

    pub request_id: Option<String>,

    /// ISO 8601 timestamp of the error
    pub timestamp: String,

    /// Whether the client should retry the request
    pub retryable: bool,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            success: false,
            error: error.user_message(),
            code: error.error_code(),
            request_id: error.request_id.clone().or_else(current_request_id),
            timestamp: Utc::now().to_rfc3339(),
            retryable: error.is_retryable(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // Internal detail goes to the log only; the body carries user_message().
        if status_code.is_server_error() {
            tracing::error!(
                error = ?self,
                context = ?self.context,
                status = status_code.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::warn!(
                error = %self,
                status = status_code.as_u16(),
                "Client error occurred"
            );
        }

        (status_code, Json(ErrorResponse::from_app_error(&self))).into_response()
    }
}

/// Create a standardized success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    Json(serde_json::json!({
        "success": true,
        "data": data,
        "timestamp": Utc::now().to_rfc3339(),
    }))
    .into_response()
}
