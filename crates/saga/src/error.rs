//! Saga error types.

use resilience::ServiceError;
use thiserror::Error;

use crate::state::SagaStatus;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Saga is in an invalid state for the requested operation.
    #[error("Invalid saga state: expected {expected}, actual {actual}")]
    InvalidState {
        expected: &'static str,
        actual: SagaStatus,
    },

    /// The request can never succeed and was rejected before running.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Two steps share a name, so results and compensations would collide.
    #[error("Duplicate step name: {0}")]
    DuplicateStep(String),

    /// A saga step failed after its retries.
    #[error("Saga step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: ServiceError,
    },

    /// A compensation step failed.
    #[error("Compensation step '{step}' failed: {source}")]
    CompensationFailed {
        step: String,
        #[source]
        source: ServiceError,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
