//! Transaction error types.

use std::time::Duration;

use resilience::ServiceError;
use thiserror::Error;

/// Errors that can occur while coordinating a transaction.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// No operation is registered under `service:operation`.
    #[error("Unknown operation '{service}:{operation}'")]
    UnknownOperation { service: String, operation: String },

    /// An earlier execution of the same idempotent request failed and the
    /// failure is still on record.
    #[error("Operation '{operation}' failed permanently: {reason}")]
    PermanentFailure { operation: String, reason: String },

    /// An operation failed after its retries.
    #[error("Operation '{operation}' failed: {source}")]
    Service {
        operation: String,
        #[source]
        source: ServiceError,
    },

    /// The transaction did not finish within its timeout.
    #[error("Transaction timed out after {0:?}")]
    Timeout(Duration),

    /// Rolling back an operation failed.
    #[error("Rollback of '{operation}' failed: {source}")]
    RollbackFailed {
        operation: String,
        #[source]
        source: ServiceError,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for transaction results.
pub type Result<T> = std::result::Result<T, TransactionError>;
