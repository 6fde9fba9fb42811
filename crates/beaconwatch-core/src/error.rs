//! Unified error types for the beaconwatch core library.
//!
//! This module provides a unified error type [`BeaconError`] that covers all failure
//! modes surfaced to callers of the coordinator. Some modules also have their own
//! specific error types ([`ConfigError`](crate::config::ConfigError),
//! [`EngineError`](crate::engine::EngineError),
//! [`SubmitError`](crate::dispatcher::SubmitError)) for internal use.
//!
//! # Design Principles
//!
//! - **Specific variants**: Each error variant captures exactly one failure mode
//! - **Actionable messages**: Error messages guide callers toward resolution
//! - **Local validation**: Identifier errors are reported to the immediate caller only
//! - **HTTP-ready**: Error types include HTTP status codes and error codes
//!
//! # Example
//!
//! ```rust
//! use beaconwatch_core::error::{BeaconError, Result};
//! use beaconwatch_core::RegionKey;
//!
//! fn watch(uuid: &str) -> Result<RegionKey> {
//!     RegionKey::parse("lobby", uuid, "", "")
//! }
//!
//! let err = watch("not-a-uuid").unwrap_err();
//! assert!(err.is_invalid_identifier());
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all beaconwatch operations.
///
/// Delivery-path failures never travel back to the scanning engine; they are
/// logged and escalated through the deferred sink. The variants here are the
/// ones a command caller can observe.
#[derive(Debug, Error)]
pub enum BeaconError {
    // =========================================================================
    // IDENTITY ERRORS
    // =========================================================================
    /// A region identifier component could not be parsed.
    #[error("Invalid {field}: '{value}'. {hint}")]
    InvalidIdentifier {
        /// Which component was malformed (`identifier`, `uuid`, `major`, `minor`).
        field: &'static str,
        /// The rejected input.
        value: String,
        /// What a valid value looks like.
        hint: &'static str,
    },

    // =========================================================================
    // SCANNING ENGINE ERRORS
    // =========================================================================
    /// The scanning engine refused a command.
    #[error("Scanning engine rejected the request: {0}")]
    EngineRejected(String),

    /// The scanning engine is not running or has been torn down.
    #[error("Scanning engine is not available. Start the coordinator before issuing commands.")]
    EngineUnavailable,

    /// A scanner setting was outside its accepted range.
    #[error("Invalid scanner setting: {0}")]
    InvalidScannerSetting(String),

    // =========================================================================
    // DELIVERY ERRORS
    // =========================================================================
    /// A deferred record could not be handed to the deferred-delivery collaborator.
    #[error("Deferred submission failed after {attempts} attempt(s): {message}")]
    SubmissionFailed {
        /// Number of submission attempts made.
        attempts: u32,
        /// Last failure reported by the collaborator.
        message: String,
    },

    /// A deferred record with the given id does not exist.
    #[error("Deferred record not found: '{0}'")]
    RecordNotFound(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for beaconwatch operations.
pub type Result<T> = std::result::Result<T, BeaconError>;

impl BeaconError {
    pub(crate) fn invalid(field: &'static str, value: impl Into<String>, hint: &'static str) -> Self {
        Self::InvalidIdentifier {
            field,
            value: value.into(),
            hint,
        }
    }

    /// Returns `true` if this error came from region key validation.
    #[inline]
    #[must_use]
    pub const fn is_invalid_identifier(&self) -> bool {
        matches!(self, Self::InvalidIdentifier { .. })
    }

    /// Returns `true` if this error is related to the scanning engine.
    #[inline]
    #[must_use]
    pub const fn is_engine_error(&self) -> bool {
        matches!(
            self,
            Self::EngineRejected(_) | Self::EngineUnavailable | Self::InvalidScannerSetting(_)
        )
    }

    /// Returns `true` if this error is related to deferred delivery.
    #[inline]
    #[must_use]
    pub const fn is_delivery_error(&self) -> bool {
        matches!(self, Self::SubmissionFailed { .. } | Self::RecordNotFound(_))
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns `true` if this error is likely recoverable without user intervention.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::SubmissionFailed { .. } | Self::EngineUnavailable)
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::InvalidIdentifier { .. } | Self::InvalidScannerSetting(_) => 400,

            // 404 Not Found
            Self::ConfigNotFound(_) | Self::RecordNotFound(_) => 404,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 500 Internal Server Error - server-side issues
            Self::PersistenceError(_) | Self::IoError(_) => 500,

            // 502 Bad Gateway - the engine answered but refused
            Self::EngineRejected(_) => 502,

            // 503 Service Unavailable - collaborator unavailable
            Self::EngineUnavailable | Self::SubmissionFailed { .. } => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier { .. } => "INVALID_IDENTIFIER",
            Self::EngineRejected(_) => "ENGINE_REJECTED",
            Self::EngineUnavailable => "ENGINE_UNAVAILABLE",
            Self::InvalidScannerSetting(_) => "INVALID_SCANNER_SETTING",
            Self::SubmissionFailed { .. } => "SUBMISSION_FAILED",
            Self::RecordNotFound(_) => "RECORD_NOT_FOUND",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for BeaconError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::LoadError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {}", path.display(), source))
            }
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::engine::EngineError> for BeaconError {
    fn from(err: crate::engine::EngineError) -> Self {
        use crate::engine::EngineError;
        match err {
            EngineError::NotBound | EngineError::ShutDown => Self::EngineUnavailable,
            EngineError::Rejected { message } => Self::EngineRejected(message),
            EngineError::InvalidLayout { layout } => {
                Self::InvalidScannerSetting(format!("beacon layout '{layout}' is not valid"))
            }
        }
    }
}

impl From<serde_json::Error> for BeaconError {
    fn from(err: serde_json::Error) -> Self {
        Self::PersistenceError(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};

    fn bad_uuid() -> BeaconError {
        BeaconError::invalid("uuid", "xyz", "Expected a 128-bit UUID.")
    }

    #[test]
    fn test_identifier_error_classification() {
        assert!(bad_uuid().is_invalid_identifier());
        assert!(!bad_uuid().is_engine_error());
        assert!(!BeaconError::EngineUnavailable.is_invalid_identifier());
    }

    #[test]
    fn test_engine_error_classification() {
        assert!(BeaconError::EngineRejected("busy".into()).is_engine_error());
        assert!(BeaconError::EngineUnavailable.is_engine_error());
        assert!(BeaconError::InvalidScannerSetting("period".into()).is_engine_error());
        assert!(!BeaconError::RecordNotFound("x".into()).is_engine_error());
    }

    #[test]
    fn test_delivery_error_classification() {
        let err = BeaconError::SubmissionFailed {
            attempts: 3,
            message: "queue full".into(),
        };
        assert!(err.is_delivery_error());
        assert!(err.is_recoverable());
        assert!(BeaconError::RecordNotFound("abc".into()).is_delivery_error());
    }

    #[test]
    fn test_config_and_io_classification() {
        assert!(BeaconError::ConfigNotFound(PathBuf::from("/test")).is_config_error());
        assert!(BeaconError::ConfigValidationError("bad".into()).is_config_error());
        assert!(BeaconError::IoError(IoErr::new(ErrorKind::NotFound, "test")).is_io_error());
        assert!(!bad_uuid().is_io_error());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(bad_uuid().http_status_code(), 400);
        assert_eq!(BeaconError::RecordNotFound("x".into()).http_status_code(), 404);
        assert_eq!(
            BeaconError::ConfigParseError("error".into()).http_status_code(),
            422
        );
        assert_eq!(
            BeaconError::PersistenceError("disk".into()).http_status_code(),
            500
        );
        assert_eq!(BeaconError::EngineRejected("no".into()).http_status_code(), 502);
        assert_eq!(BeaconError::EngineUnavailable.http_status_code(), 503);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(bad_uuid().error_code(), "INVALID_IDENTIFIER");
        assert_eq!(
            BeaconError::EngineUnavailable.error_code(),
            "ENGINE_UNAVAILABLE"
        );
        assert_eq!(
            BeaconError::ConfigNotFound(PathBuf::new()).error_code(),
            "CONFIG_NOT_FOUND"
        );
    }

    #[test]
    fn test_error_display_messages() {
        let message = bad_uuid().to_string();
        assert!(message.contains("Invalid uuid"));
        assert!(message.contains("'xyz'"));

        let err = BeaconError::EngineRejected("region limit reached".into());
        assert!(err.to_string().contains("region limit reached"));
    }

    #[test]
    fn test_from_engine_error() {
        let err: BeaconError = crate::engine::EngineError::NotBound.into();
        assert!(matches!(err, BeaconError::EngineUnavailable));

        let err: BeaconError = crate::engine::EngineError::Rejected {
            message: "nope".into(),
        }
        .into();
        assert!(matches!(err, BeaconError::EngineRejected(ref m) if m == "nope"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<BeaconError>();
        assert_sync::<BeaconError>();
    }
}
