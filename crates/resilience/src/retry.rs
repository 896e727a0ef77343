//! Retry policies and the executor that applies them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `initial_delay * 2^n`
    #[default]
    Exponential,
    /// `initial_delay * (n + 1)`
    Linear,
    /// `initial_delay`
    Fixed,
}

/// Decides whether an error is worth another attempt.
pub type RetryCondition = Arc<dyn Fn(&ServiceError) -> bool + Send + Sync>;

/// Immutable retry configuration supplied per call site.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff: BackoffStrategy,
    /// Scales each delay into `[0.5, 1.0]` of its computed value.
    pub jitter: bool,
    pub retry_condition: RetryCondition,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff: BackoffStrategy::Exponential,
            jitter: true,
            retry_condition: Arc::new(ServiceError::is_retryable),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff without jitter.
    pub fn exponential(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            jitter: false,
            ..Self::default()
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Returns a copy with a different retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Returns a copy with a different backoff strategy.
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns a copy with jitter switched on or off.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns a copy with a custom retry predicate.
    pub fn with_retry_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&ServiceError) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Arc::new(condition);
        self
    }

    /// Returns true if `error` should be retried.
    pub fn should_retry(&self, error: &ServiceError) -> bool {
        (self.retry_condition)(error)
    }

    /// Delay before retry `attempt` (0-indexed), clamped to `max_delay`, before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            BackoffStrategy::Exponential => self
                .initial_delay
                .saturating_mul(2u32.saturating_pow(attempt)),
            BackoffStrategy::Linear => self.initial_delay.saturating_mul(attempt.saturating_add(1)),
            BackoffStrategy::Fixed => self.initial_delay,
        };
        delay.min(self.max_delay)
    }

    /// Delay before retry `attempt` with jitter applied when enabled.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if self.jitter {
            delay.mul_f64(0.5 + fastrand::f64() * 0.5)
        } else {
            delay
        }
    }
}

/// Outcome bookkeeping for one retry loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryMetrics {
    pub attempts: u32,
    pub total_delay: Duration,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RetryMetrics {
    /// Metrics for a single attempt with no delay.
    pub fn single_attempt() -> Self {
        let now = Utc::now();
        Self {
            attempts: 1,
            total_delay: Duration::ZERO,
            started_at: now,
            finished_at: now,
        }
    }
}

/// Runs an operation repeatedly according to a [`RetryPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryExecutor;

impl RetryExecutor {
    /// Creates a retry executor.
    pub fn new() -> Self {
        Self
    }

    /// Runs `operation` until it succeeds or the policy gives up.
    ///
    /// Fails with [`ServiceError::RetryExhausted`] carrying the last error.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        operation_name: &str,
        policy: &RetryPolicy,
        operation: F,
    ) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        self.execute_with_metrics(operation_name, policy, operation)
            .await
            .map(|(value, _)| value)
    }

    /// Like [`execute_with_retry`](Self::execute_with_retry), also returning
    /// the metrics of the successful loop.
    pub async fn execute_with_metrics<T, F, Fut>(
        &self,
        operation_name: &str,
        policy: &RetryPolicy,
        mut operation: F,
    ) -> Result<(T, RetryMetrics), ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let started_at = Utc::now();
        let mut total_delay = Duration::ZERO;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let error = match operation().await {
                Ok(value) => {
                    let metrics = RetryMetrics {
                        attempts,
                        total_delay,
                        started_at,
                        finished_at: Utc::now(),
                    };
                    return Ok((value, metrics));
                }
                Err(error) => error,
            };

            if attempts > policy.max_retries || !policy.should_retry(&error) {
                metrics::counter!("retry_exhausted_total", "operation" => operation_name.to_string())
                    .increment(1);
                tracing::debug!(
                    operation = operation_name,
                    attempts,
                    error = %error,
                    "giving up"
                );
                return Err(ServiceError::RetryExhausted {
                    last_error: Box::new(error),
                    metrics: RetryMetrics {
                        attempts,
                        total_delay,
                        started_at,
                        finished_at: Utc::now(),
                    },
                });
            }

            let delay = policy.delay_for_attempt(attempts - 1);
            tracing::warn!(
                operation = operation_name,
                attempt = attempts,
                max_attempts = policy.max_retries + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "operation failed, retrying"
            );
            metrics::counter!("retry_attempts_total", "operation" => operation_name.to_string())
                .increment(1);

            tokio::time::sleep(delay).await;
            total_delay += delay;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(backoff: BackoffStrategy) -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            backoff,
            jitter: false,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_exponential_delays_are_clamped() {
        let p = policy(BackoffStrategy::Exponential);
        assert_eq!(p.base_delay(0), Duration::from_millis(100));
        assert_eq!(p.base_delay(1), Duration::from_millis(200));
        assert_eq!(p.base_delay(2), Duration::from_millis(250));
        assert_eq!(p.base_delay(40), Duration::from_millis(250));
    }

    #[test]
    fn test_linear_and_fixed_delays() {
        let linear = policy(BackoffStrategy::Linear);
        assert_eq!(linear.base_delay(0), Duration::from_millis(100));
        assert_eq!(linear.base_delay(1), Duration::from_millis(200));
        assert_eq!(linear.base_delay(5), Duration::from_millis(250));

        let fixed = policy(BackoffStrategy::Fixed);
        assert_eq!(fixed.base_delay(0), fixed.base_delay(7));
    }

    #[test]
    fn test_jitter_stays_within_half_to_full() {
        let p = policy(BackoffStrategy::Fixed).with_jitter(true);
        for _ in 0..200 {
            let d = p.delay_for_attempt(0);
            assert!(d >= Duration::from_millis(50) && d <= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_makes_max_plus_one_attempts() {
        let calls = AtomicU32::new(0);
        let p = RetryPolicy::exponential(3, Duration::from_millis(100));

        let result: Result<(), _> = RetryExecutor::new()
            .execute_with_retry("reserve", &p, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ServiceError::unavailable("down")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let metrics = result.unwrap_err().retry_metrics().cloned().unwrap();
        assert_eq!(metrics.attempts, 4);
        assert_eq!(metrics.total_delay, Duration::from_millis(100 + 200 + 400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_false_stops_after_first_attempt() {
        let calls = AtomicU32::new(0);
        let p = RetryPolicy::exponential(3, Duration::from_millis(10)).with_retry_condition(|_| false);

        let result: Result<(), _> = RetryExecutor::new()
            .execute_with_retry("charge", &p, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ServiceError::unavailable("down")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err().retry_metrics().unwrap().attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_condition_skips_client_errors() {
        let calls = AtomicU32::new(0);
        let p = RetryPolicy::exponential(3, Duration::from_millis(10));

        let result: Result<(), _> = RetryExecutor::new()
            .execute_with_retry("reserve", &p, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ServiceError::InsufficientStock("SKU-1".into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result.unwrap_err().root_cause(),
            ServiceError::InsufficientStock(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let p = RetryPolicy::exponential(3, Duration::from_millis(10));

        let (value, metrics) = RetryExecutor::new()
            .execute_with_metrics("lookup", &p, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ServiceError::status(503, "busy"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(metrics.attempts, 3);
    }

    #[tokio::test]
    async fn test_zero_retries_runs_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryExecutor::new()
            .execute_with_retry("notify", &RetryPolicy::none(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ServiceError::unavailable("smtp down")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
