//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service, and the mapping
//! from lifecycle failures to HTTP responses.

use crate::config::ConfigError;
use axum::http::StatusCode;
use compliance_core::lifecycle::LifecycleError;
use compliance_core::ports::PortError;
use tracing::error;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a failure while applying the embedded migrations.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// The HTTP status a lifecycle failure is reported with.
pub fn lifecycle_status(err: &LifecycleError) -> StatusCode {
    match err {
        LifecycleError::InvalidInput(_)
        | LifecycleError::UnknownPlan(_)
        | LifecycleError::MissingExternalId(_) => StatusCode::BAD_REQUEST,
        LifecycleError::NotFound(_) => StatusCode::NOT_FOUND,
        LifecycleError::InvalidState { .. }
        | LifecycleError::AlreadySubscribed(_)
        | LifecycleError::TransitionInFlight(_) => StatusCode::CONFLICT,
        LifecycleError::MandateInvalid(_) => StatusCode::PAYMENT_REQUIRED,
        LifecycleError::Processor(_) | LifecycleError::UnrecognizedStatus(_) => {
            StatusCode::BAD_GATEWAY
        }
        LifecycleError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Turns a lifecycle failure into the `(status, message)` pair handlers return.
///
/// Processor messages are passed through as-is; storage failures are logged and
/// replaced by a generic message.
pub fn reject(err: LifecycleError) -> (StatusCode, String) {
    let status = lifecycle_status(&err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Subscription operation failed: {:?}", err);
        return (status, "Internal server error".to_string());
    }
    (status, err.to_string())
}
