//! API error types and response handling.
//!
//! This module provides a unified error type for all API handlers
//! with automatic conversion to appropriate HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use beaconwatch_core::BeaconError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
///
/// Each variant maps to a specific HTTP status code and produces a
/// consistent JSON error response.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 404 Not Found - Resource does not exist.
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 424 Failed Dependency - The scanning engine refused the command.
    FailedDependency {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 500 Internal Server Error - Unexpected server-side error.
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 503 Service Unavailable - The engine or the deferred sink is unavailable.
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "invalid_identifier",
    "message": "Invalid uuid: 'abc'. Expected a 128-bit UUID such as 'E2C56DB5-DFFB-48D2-B060-D0F5A71096E0'."
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "invalid_identifier").
    #[schema(example = "invalid_identifier")]
    pub error: String,

    /// Human-readable error message.
    pub message: String,
}

impl ApiError {
    /// HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::FailedDependency { .. } => StatusCode::FAILED_DEPENDENCY,
            Self::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Shorthand for a 400 with the given code.
    pub fn bad_request(error_code: &str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            error_code: error_code.to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error, message) = match self {
            Self::InternalError {
                error_code,
                message,
            } => {
                tracing::error!(
                    error_code = %error_code,
                    message = %message,
                    "Internal server error"
                );
                (error_code, message)
            }
            Self::BadRequest {
                error_code,
                message,
            }
            | Self::NotFound {
                error_code,
                message,
            }
            | Self::FailedDependency {
                error_code,
                message,
            }
            | Self::ServiceUnavailable {
                error_code,
                message,
            } => (error_code, message),
        };

        (status, Json(ErrorResponse { error, message })).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::NotFound { message, .. } => write!(f, "Not Found: {message}"),
            Self::FailedDependency { message, .. } => {
                write!(f, "Failed Dependency: {message}")
            }
            Self::InternalError { message, .. } => {
                write!(f, "Internal Error: {message}")
            }
            Self::ServiceUnavailable { message, .. } => {
                write!(f, "Service Unavailable: {message}")
            }
        }
    }
}

impl std::error::Error for ApiError {}

/// Convert from beaconwatch_core errors.
impl From<BeaconError> for ApiError {
    fn from(err: BeaconError) -> Self {
        let error_code = err.error_code().to_lowercase();
        let message = err.to_string();

        match &err {
            BeaconError::InvalidIdentifier { .. } | BeaconError::InvalidScannerSetting(_) => {
                Self::BadRequest {
                    error_code,
                    message,
                }
            }
            BeaconError::RecordNotFound(_) | BeaconError::ConfigNotFound(_) => Self::NotFound {
                error_code,
                message,
            },
            BeaconError::EngineRejected(_) => Self::FailedDependency {
                error_code,
                message,
            },
            BeaconError::EngineUnavailable | BeaconError::SubmissionFailed { .. } => {
                Self::ServiceUnavailable {
                    error_code,
                    message,
                }
            }
            BeaconError::ConfigParseError(_)
            | BeaconError::ConfigValidationError(_)
            | BeaconError::PersistenceError(_)
            | BeaconError::IoError(_) => Self::InternalError {
                error_code,
                message,
            },
        }
    }
}

impl From<beaconwatch_core::EngineError> for ApiError {
    fn from(err: beaconwatch_core::EngineError) -> Self {
        Self::from(BeaconError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_request_error() {
        let err = ApiError::bad_request("test_error", "Test message");
        assert!(err.to_string().contains("Bad Request"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse {
            error: "test_error".to_string(),
            message: "Test message".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("test_error"));
    }

    #[test]
    fn test_from_beacon_error() {
        let err = ApiError::from(BeaconError::RecordNotFound("x".into()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = ApiError::from(BeaconError::EngineUnavailable);
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);

        let err = ApiError::from(BeaconError::EngineRejected("busy".into()));
        assert_eq!(err.status(), StatusCode::FAILED_DEPENDENCY);
    }

    #[test]
    fn test_identifier_error_code() {
        let err = beaconwatch_core::RegionKey::parse("r1", "nope", "", "").unwrap_err();
        match ApiError::from(err) {
            ApiError::BadRequest { error_code, .. } => {
                assert_eq!(error_code, "invalid_identifier");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
