//! Error response formatting
//!
//! Standardized JSON error bodies with consistent status codes, machine
//! error codes, and user-facing messages.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, ErrorCode};

/// Standardized error response structure returned for all error cases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Request ID for debugging and support
    pub request_id: Option<String>,

    /// ISO 8601 timestamp of the error
    pub timestamp: String,

    /// Optional additional details (e.g., validation errors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Whether the client should retry the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: Some(error.is_retryable()),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn internal_error(request_id: Option<String>) -> Self {
        Self {
            error: ErrorCode::InternalError,
            message: "An internal server error occurred. Please try again later.".to_string(),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: Some(false),
        }
    }

    pub fn validation_error(request_id: Option<String>, field: &str, message: &str) -> Self {
        Self {
            error: ErrorCode::ValidationError,
            message: format!("Validation failed for field '{}'", field),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            details: Some(serde_json::json!({
                "field": field,
                "error": message,
            })),
            retryable: Some(false),
        }
    }
}

/// Convert AppError into an HTTP response with proper status and JSON body
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status_code.is_server_error() {
            tracing::error!(
                error = ?self,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::warn!(
                error = ?self,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Client error occurred"
            );
        }

        let error_response = ErrorResponse::from_app_error(&self);
        (status_code, Json(error_response)).into_response()
    }
}

/// Helper to extract request ID from request headers
pub fn get_request_id_from_headers(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Build a standardized JSON error response for handlers that return StatusCode + message.
pub fn json_error_response(
    status: StatusCode,
    message: impl Into<String>,
    request_id: Option<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    let message = message.into();
    let error_response = match status.as_u16() {
        400..=499 => ErrorResponse::validation_error(request_id, "request", &message)
            .with_details(serde_json::json!({ "message": message })),
        _ => ErrorResponse::internal_error(request_id),
    };

    (status, Json(error_response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppErrorKind};
    use axum::response::IntoResponse;

    #[test]
    fn test_error_response_from_app_error() {
        let app_error = AppError::new(AppErrorKind::Authentication {
            reason: "signature mismatch".to_string(),
        })
        .with_request_id("req_123");

        let error_response = ErrorResponse::from_app_error(&app_error);

        assert_eq!(error_response.error, ErrorCode::InvalidSignature);
        assert_eq!(error_response.request_id, Some("req_123".to_string()));
        assert!(error_response.message.contains("signature"));
    }

    #[test]
    fn test_app_error_into_response() {
        let app_error = AppError::new(AppErrorKind::Replay {
            reason: "replay detected".to_string(),
            conflict: true,
        });

        let response = app_error.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_validation_error_carries_details() {
        let response = ErrorResponse::validation_error(None, "amount", "must be positive");
        assert_eq!(response.error, ErrorCode::ValidationError);
        assert!(response.details.is_some());
    }
}
