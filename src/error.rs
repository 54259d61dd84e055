//! Unified error handling for the payment-callback service
//!
//! Maps every failure class to an HTTP status, a machine-readable error code,
//! and a user-facing message. Soft-fail semantics for callback processing
//! (HTTP 200 with an internal result code) are handled at the API layer; this
//! module covers the surfaces that do return error statuses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic client handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    #[serde(rename = "INVALID_SIGNATURE")]
    InvalidSignature,
    #[serde(rename = "REPLAY_REJECTED")]
    ReplayRejected,
    #[serde(rename = "STALE_CALLBACK")]
    StaleCallback,
    #[serde(rename = "ORIGIN_FORBIDDEN")]
    OriginForbidden,
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,
    #[serde(rename = "GATEWAY_ERROR")]
    GatewayError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    /// Callback failed signature verification (or the header was missing)
    Authentication { reason: String },
    /// Request carried an `Origin` header outside the allow-list
    OriginForbidden { origin: String },
    /// Replay-guard rejection. `conflict` distinguishes a reused nonce (409)
    /// from stale/missing/unparseable replay metadata (401).
    Replay { reason: String, conflict: bool },
    /// Callback references a payment record that does not exist
    PaymentNotFound {
        merchant_request_id: String,
        checkout_request_id: String,
    },
    /// Store read/write failure
    Persistence {
        message: String,
        is_retryable: bool,
    },
    /// Missing or invalid configuration
    Configuration { message: String },
    /// Outbound payment-gateway failure
    Gateway {
        message: String,
        is_retryable: bool,
    },
    /// Input validation failure
    Validation { field: String, message: String },
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Authentication { .. } => 401,
            AppErrorKind::OriginForbidden { .. } => 403,
            AppErrorKind::Replay { conflict, .. } => {
                if *conflict {
                    409
                } else {
                    401
                }
            }
            AppErrorKind::PaymentNotFound { .. } => 404,
            AppErrorKind::Persistence { .. } => 500,
            AppErrorKind::Configuration { .. } => 500,
            AppErrorKind::Gateway { .. } => 502,
            AppErrorKind::Validation { .. } => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Authentication { .. } => ErrorCode::InvalidSignature,
            AppErrorKind::OriginForbidden { .. } => ErrorCode::OriginForbidden,
            AppErrorKind::Replay { conflict, .. } => {
                if *conflict {
                    ErrorCode::ReplayRejected
                } else {
                    ErrorCode::StaleCallback
                }
            }
            AppErrorKind::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
            AppErrorKind::Persistence { .. } => ErrorCode::DatabaseError,
            AppErrorKind::Configuration { .. } => ErrorCode::ConfigurationError,
            AppErrorKind::Gateway { .. } => ErrorCode::GatewayError,
            AppErrorKind::Validation { .. } => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Authentication { reason } => {
                format!("Callback signature verification failed: {}", reason)
            }
            AppErrorKind::OriginForbidden { origin } => {
                format!("Origin '{}' is not allowed", origin)
            }
            AppErrorKind::Replay { reason, .. } => {
                format!("Callback rejected: {}", reason)
            }
            AppErrorKind::PaymentNotFound {
                merchant_request_id,
                checkout_request_id,
            } => format!(
                "No payment record matches ({}, {})",
                merchant_request_id, checkout_request_id
            ),
            AppErrorKind::Persistence { .. } => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::Configuration { message } => {
                format!("Service misconfigured: {}", message)
            }
            AppErrorKind::Gateway { is_retryable, .. } => {
                if *is_retryable {
                    "Payment gateway is temporarily unavailable. Please try again".to_string()
                } else {
                    "Payment gateway rejected the request. Please contact support".to_string()
                }
            }
            AppErrorKind::Validation { field, message } => {
                format!("Invalid value for '{}': {}", field, message)
            }
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Authentication { .. } => false,
            AppErrorKind::OriginForbidden { .. } => false,
            AppErrorKind::Replay { .. } => false,
            AppErrorKind::PaymentNotFound { .. } => false,
            AppErrorKind::Persistence { is_retryable, .. } => *is_retryable,
            AppErrorKind::Configuration { .. } => false,
            AppErrorKind::Gateway { is_retryable, .. } => *is_retryable,
            AppErrorKind::Validation { .. } => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

impl From<crate::config::ConfigError> for AppError {
    fn from(err: crate::config::ConfigError) -> Self {
        AppError::new(AppErrorKind::Configuration {
            message: err.to_string(),
        })
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_error() {
        let error = AppError::new(AppErrorKind::Authentication {
            reason: "signature mismatch".to_string(),
        });

        assert_eq!(error.status_code(), 401);
        assert_eq!(error.error_code(), ErrorCode::InvalidSignature);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_replay_conflict_maps_to_409() {
        let error = AppError::new(AppErrorKind::Replay {
            reason: "replay detected for nonce n1".to_string(),
            conflict: true,
        });

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::ReplayRejected);
    }

    #[test]
    fn test_stale_replay_maps_to_401() {
        let error = AppError::new(AppErrorKind::Replay {
            reason: "stale callback timestamp".to_string(),
            conflict: false,
        });

        assert_eq!(error.status_code(), 401);
        assert_eq!(error.error_code(), ErrorCode::StaleCallback);
    }

    #[test]
    fn test_persistence_error_retryable_flag() {
        let error = AppError::new(AppErrorKind::Persistence {
            message: "pool timeout".to_string(),
            is_retryable: true,
        });

        assert_eq!(error.status_code(), 500);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::new(AppErrorKind::Validation {
            field: "amount".to_string(),
            message: "must be greater than zero".to_string(),
        });

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(error.user_message().contains("amount"));
    }
}
