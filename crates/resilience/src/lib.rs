//! Failure isolation for outbound service calls.
//!
//! - [`CircuitBreaker`]: per-dependency Closed/Open/HalfOpen state machine.
//! - [`CircuitBreakerRegistry`]: lazily creates and shares one breaker per dependency.
//! - [`RetryExecutor`]: retries a fallible operation under a [`RetryPolicy`].
//! - [`ResilientCallExecutor`]: retry around breaker around one outbound call.
//!
//! Every outbound failure is expressed as a [`ServiceError`], which also knows
//! whether it is worth retrying.

pub mod circuit_breaker;
pub mod error;
pub mod executor;
pub mod registry;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
pub use error::{Result, ServiceError};
pub use executor::ResilientCallExecutor;
pub use registry::CircuitBreakerRegistry;
pub use retry::{BackoffStrategy, RetryCondition, RetryExecutor, RetryMetrics, RetryPolicy};
