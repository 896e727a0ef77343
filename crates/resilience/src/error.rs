//! Outbound call error types.

use std::time::Duration;

use thiserror::Error;

use crate::circuit_breaker::CircuitBreakerMetrics;
use crate::retry::RetryMetrics;

/// Errors produced by an outbound service call or by the resilience
/// machinery wrapped around it.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The dependency's circuit is open; the call was not attempted.
    #[error("Circuit breaker for '{service}' is open")]
    CircuitOpen {
        service: String,
        metrics: Box<CircuitBreakerMetrics>,
    },

    /// The call did not finish within the configured timeout.
    #[error("Call to '{service}' timed out after {timeout:?}")]
    Timeout { service: String, timeout: Duration },

    /// Retry policy gave up; carries the last underlying error.
    #[error("Retries exhausted after {} attempt(s): {last_error}", .metrics.attempts)]
    RetryExhausted {
        last_error: Box<ServiceError>,
        metrics: RetryMetrics,
    },

    /// The dependency answered with an error status code.
    #[error("Service responded with status {status}: {message}")]
    Status { status: u16, message: String },

    /// Not enough stock to satisfy a reservation.
    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    /// The payment method was rejected as invalid.
    #[error("Invalid payment method: {0}")]
    InvalidPaymentMethod(String),

    /// The payment was declined.
    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    /// The referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The dependency could not be reached.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The request payload could not be interpreted.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

impl ServiceError {
    /// Creates an `Unavailable` error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        ServiceError::Unavailable(reason.into())
    }

    /// Creates a `Status` error.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        ServiceError::Status {
            status,
            message: message.into(),
        }
    }

    /// Default retry classification.
    ///
    /// Client errors (4xx other than 408/429), business rejections, open
    /// circuits and already-exhausted retries are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Status { status, .. } => {
                *status >= 500 || *status == 429 || *status == 408
            }
            ServiceError::Timeout { .. } | ServiceError::Unavailable(_) | ServiceError::Other(_) => {
                true
            }
            ServiceError::CircuitOpen { .. }
            | ServiceError::RetryExhausted { .. }
            | ServiceError::InsufficientStock(_)
            | ServiceError::InvalidPaymentMethod(_)
            | ServiceError::PaymentDeclined(_)
            | ServiceError::NotFound(_)
            | ServiceError::InvalidPayload(_) => false,
        }
    }

    /// Returns the innermost error, looking through `RetryExhausted`.
    pub fn root_cause(&self) -> &ServiceError {
        match self {
            ServiceError::RetryExhausted { last_error, .. } => last_error.root_cause(),
            other => other,
        }
    }

    /// Returns retry metrics when this error came out of a retry loop.
    pub fn retry_metrics(&self) -> Option<&RetryMetrics> {
        match self {
            ServiceError::RetryExhausted { metrics, .. } => Some(metrics),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::InvalidPayload(err.to_string())
    }
}

/// Convenience type alias for outbound call results.
pub type Result<T> = std::result::Result<T, ServiceError>;
