//! Retry-around-breaker composition for one outbound call.

use std::future::Future;
use std::sync::Arc;

use crate::error::ServiceError;
use crate::registry::CircuitBreakerRegistry;
use crate::retry::{RetryExecutor, RetryMetrics, RetryPolicy};

/// Executes outbound calls through the named dependency's circuit breaker,
/// retrying according to the caller's policy.
///
/// Each attempt passes through the breaker, so failures during retries
/// count toward opening the circuit, and an open circuit stops the retry
/// loop (it is not retryable under the default condition).
#[derive(Debug, Clone)]
pub struct ResilientCallExecutor {
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryExecutor,
}

impl ResilientCallExecutor {
    /// Creates an executor backed by a shared breaker registry.
    pub fn new(breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            breakers,
            retry: RetryExecutor::new(),
        }
    }

    /// Returns the breaker registry.
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Calls `service` with retry and circuit protection.
    pub async fn call<T, F, Fut>(
        &self,
        service: &str,
        policy: &RetryPolicy,
        operation: F,
    ) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        self.call_with_metrics(service, policy, operation)
            .await
            .map(|(value, _)| value)
    }

    /// Like [`call`](Self::call), also returning the retry metrics.
    pub async fn call_with_metrics<T, F, Fut>(
        &self,
        service: &str,
        policy: &RetryPolicy,
        mut operation: F,
    ) -> Result<(T, RetryMetrics), ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let breaker = self.breakers.get(service);
        self.retry
            .execute_with_metrics(service, policy, || {
                let breaker = Arc::clone(&breaker);
                // Build the attempt only once the breaker lets it through.
                let attempt = breaker.admit().map(|()| operation());
                async move { breaker.run_admitted(attempt?).await }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};

    fn executor(failure_threshold: u32) -> ResilientCallExecutor {
        ResilientCallExecutor::new(Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold,
            reset_timeout: Duration::from_secs(30),
            timeout: None,
            ..CircuitBreakerConfig::default()
        })))
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_attempt_goes_through_breaker() {
        let exec = executor(10);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = exec
            .call(
                "inventory",
                &RetryPolicy::exponential(2, Duration::from_millis(10)),
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(ServiceError::unavailable("down")) }
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let metrics = exec.breakers().get("inventory").metrics();
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.failed_requests, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_stops_retry_loop() {
        let exec = executor(2);
        let calls = AtomicU32::new(0);

        let err = exec
            .call(
                "payment",
                &RetryPolicy::exponential(5, Duration::from_millis(10)),
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(ServiceError::unavailable("down")) }
                },
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(err.root_cause(), ServiceError::CircuitOpen { .. }));
        assert_eq!(exec.breakers().get("payment").state(), CircuitState::Open);
        assert_eq!(err.retry_metrics().unwrap().attempts, 3);
    }

    #[tokio::test]
    async fn test_open_circuit_never_builds_the_attempt() {
        let exec = executor(3);
        exec.breakers().get("payment").force_open();
        let calls = AtomicU32::new(0);

        let err = exec
            .call("payment", &RetryPolicy::none(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, ServiceError>(()) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(err.root_cause(), ServiceError::CircuitOpen { .. }));
        assert_eq!(exec.breakers().get("payment").metrics().total_requests, 0);
    }

    #[tokio::test]
    async fn test_success_returns_value_and_metrics() {
        let exec = executor(3);
        let (value, metrics) = exec
            .call_with_metrics("users", &RetryPolicy::none(), || async { Ok(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(metrics.attempts, 1);
    }
}
