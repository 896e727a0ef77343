//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use resilience::ServiceError;
use saga::SagaError;
use transaction::TransactionError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// The resource is in a state that forbids the request.
    Conflict(String),
    /// A downstream call failed outside of a saga or transaction.
    Service(ServiceError),
    /// Saga execution error.
    Saga(SagaError),
    /// Transaction coordination error.
    Transaction(TransactionError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Service(err) => (service_status(&err), err.to_string()),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Transaction(err) => transaction_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn service_status(err: &ServiceError) -> StatusCode {
    match err.root_cause() {
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::InvalidPayload(_) | ServiceError::InvalidPaymentMethod(_) => {
            StatusCode::BAD_REQUEST
        }
        ServiceError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match &err {
        SagaError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        SagaError::InvalidState { .. } => (StatusCode::CONFLICT, err.to_string()),
        SagaError::StepFailed { source, .. } | SagaError::CompensationFailed { source, .. } => {
            (service_status(source), err.to_string())
        }
        _ => {
            tracing::error!(error = %err, "saga misconfigured");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

fn transaction_error_to_response(err: TransactionError) -> (StatusCode, String) {
    match &err {
        TransactionError::PermanentFailure { .. } => (StatusCode::CONFLICT, err.to_string()),
        TransactionError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, err.to_string()),
        TransactionError::Service { source, .. }
        | TransactionError::RollbackFailed { source, .. } => {
            (service_status(source), err.to_string())
        }
        _ => {
            tracing::error!(error = %err, "transaction misconfigured");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<TransactionError> for ApiError {
    fn from(err: TransactionError) -> Self {
        ApiError::Transaction(err)
    }
}
