//! The saga step contract.

use async_trait::async_trait;
use resilience::ServiceError;
use serde_json::Value;

use crate::context::SagaContext;

/// Default number of retries for a step that does not override it.
pub const DEFAULT_STEP_RETRIES: u32 = 3;

/// One forward action of a saga and its compensating action.
#[async_trait]
pub trait SagaStep: Send + Sync {
    /// Unique name of the step within its saga.
    fn name(&self) -> &str;

    /// Name of the dependency this step calls.
    ///
    /// When set, every attempt goes through that dependency's circuit breaker.
    fn service(&self) -> Option<&str> {
        None
    }

    /// Whether a failed attempt may be retried.
    fn retryable(&self) -> bool {
        true
    }

    /// Upper bound on retries, further capped by the orchestrator's policy.
    fn max_retries(&self) -> u32 {
        DEFAULT_STEP_RETRIES
    }

    /// Performs the step. The returned value is stored under [`Self::name`].
    async fn execute(&self, ctx: &SagaContext) -> Result<Value, ServiceError>;

    /// Undoes the step given the value it returned. Steps with nothing
    /// to undo keep the default.
    async fn compensate(&self, _ctx: &SagaContext, _result: &Value) -> Result<(), ServiceError> {
        Ok(())
    }
}
