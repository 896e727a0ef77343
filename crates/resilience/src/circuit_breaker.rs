//! Circuit breaker for one downstream dependency.
//!
//! ```text
//! Closed ──(failure_threshold consecutive failures)──► Open
//! Open ──(reset_timeout elapsed, next call)──► HalfOpen
//! HalfOpen ──(success_threshold successes)──► Closed
//! HalfOpen ──(any failure)──► Open
//! ```

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::ServiceError;

/// Operational mode of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CircuitState {
    /// Normal operation; calls pass through.
    #[default]
    Closed,
    /// Failing fast; calls are rejected until the reset timeout elapses.
    Open,
    /// Probing recovery; calls pass through and a failure re-opens.
    HalfOpen,
}

impl CircuitState {
    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open => "Open",
            CircuitState::HalfOpen => "HalfOpen",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed state that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a trial call.
    pub reset_timeout: Duration,
    /// A failure streak is broken when two failures are further apart than this.
    pub monitoring_period: Duration,
    /// Successes in HalfOpen state needed to close the circuit.
    pub success_threshold: u32,
    /// Per-call timeout; `None` disables it.
    pub timeout: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(10),
            success_threshold: 2,
            timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// Point-in-time counters for one breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub consecutive_failures: u32,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_failure_time: Option<DateTime<Utc>>,
    /// When an open circuit will next admit a call.
    pub next_attempt: Option<DateTime<Utc>>,
}

impl CircuitBreakerMetrics {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: CircuitState::Closed,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            consecutive_failures: 0,
            last_success_time: None,
            last_failure_time: None,
            next_attempt: None,
        }
    }

    /// Fraction of executed requests that failed, 0.0 when none ran.
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failed_requests as f64 / self.total_requests as f64
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    metrics: CircuitBreakerMetrics,
    next_attempt_at: Option<Instant>,
    last_failure_at: Option<Instant>,
    half_open_successes: u32,
}

/// Records an abandoned call when dropped before the outcome is known.
struct InFlight<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_failure(&ServiceError::Other(
                "call abandoned before completion".to_string(),
            ));
        }
    }
}

/// Failure-isolation guard for a single dependency.
///
/// All bookkeeping happens under a short synchronous lock that is never
/// held while the wrapped operation runs.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a closed circuit breaker for the named dependency.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        tracing::debug!(
            breaker = %name,
            failure_threshold = config.failure_threshold,
            reset_timeout_ms = config.reset_timeout.as_millis() as u64,
            success_threshold = config.success_threshold,
            "circuit breaker initialized"
        );
        Self {
            inner: Mutex::new(BreakerInner {
                metrics: CircuitBreakerMetrics::new(&name),
                next_attempt_at: None,
                last_failure_at: None,
                half_open_successes: 0,
            }),
            name,
            config,
        }
    }

    /// Returns the dependency name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns the current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().metrics.state
    }

    /// Returns a snapshot of the counters.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.inner.lock().metrics.clone()
    }

    /// Runs `operation` under circuit protection.
    ///
    /// Fails with [`ServiceError::CircuitOpen`] without invoking the operation
    /// while the circuit is open. A configured timeout counts as a failure.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        self.admit()?;
        self.run_admitted(operation()).await
    }

    /// Awaits an attempt that [`admit`](Self::admit) let through and records
    /// its outcome. An attempt dropped before it finishes counts as a failure,
    /// so an abandoned half-open trial call re-opens the circuit.
    pub(crate) async fn run_admitted<T, Fut>(&self, attempt: Fut) -> Result<T, ServiceError>
    where
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut in_flight = InFlight {
            breaker: self,
            settled: false,
        };

        let outcome = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Timeout {
                    service: self.name.clone(),
                    timeout: limit,
                }),
            },
            None => attempt.await,
        };

        in_flight.settled = true;
        match &outcome {
            Ok(_) => self.on_success(),
            Err(error) => self.on_failure(error),
        }
        outcome
    }

    /// Decides whether a call may proceed and counts it.
    pub(crate) fn admit(&self) -> Result<(), ServiceError> {
        let mut inner = self.inner.lock();
        if inner.metrics.state == CircuitState::Open {
            let ready = inner
                .next_attempt_at
                .is_none_or(|at| Instant::now() >= at);
            if !ready {
                metrics::counter!("circuit_breaker_rejections_total", "service" => self.name.clone())
                    .increment(1);
                return Err(ServiceError::CircuitOpen {
                    service: self.name.clone(),
                    metrics: Box::new(inner.metrics.clone()),
                });
            }
            self.transition(&mut inner, CircuitState::HalfOpen);
        }
        inner.metrics.total_requests += 1;
        Ok(())
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        inner.metrics.successful_requests += 1;
        inner.metrics.consecutive_failures = 0;
        inner.metrics.last_success_time = Some(Utc::now());

        if inner.metrics.state == CircuitState::HalfOpen {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= self.config.success_threshold {
                self.transition(&mut inner, CircuitState::Closed);
            }
        }
    }

    fn on_failure(&self, error: &ServiceError) {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let streak_expired = inner
            .last_failure_at
            .is_some_and(|last| now.duration_since(last) > self.config.monitoring_period);
        if streak_expired {
            inner.metrics.consecutive_failures = 0;
        }

        inner.metrics.failed_requests += 1;
        inner.metrics.consecutive_failures += 1;
        inner.metrics.last_failure_time = Some(Utc::now());
        inner.last_failure_at = Some(now);

        tracing::debug!(
            breaker = %self.name,
            consecutive_failures = inner.metrics.consecutive_failures,
            error = %error,
            "call failed"
        );

        match inner.metrics.state {
            CircuitState::Closed
                if inner.metrics.consecutive_failures >= self.config.failure_threshold =>
            {
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open),
            _ => {}
        }
    }

    /// Applies a state change with its side effects. Caller holds the lock.
    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.metrics.state;
        inner.metrics.state = to;
        match to {
            CircuitState::Open => {
                inner.next_attempt_at = Some(Instant::now() + self.config.reset_timeout);
                inner.metrics.next_attempt = chrono::Duration::from_std(self.config.reset_timeout)
                    .ok()
                    .map(|d| Utc::now() + d);
                inner.half_open_successes = 0;
                tracing::warn!(
                    breaker = %self.name,
                    %from,
                    consecutive_failures = inner.metrics.consecutive_failures,
                    reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                    "circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes = 0;
                tracing::info!(breaker = %self.name, %from, "circuit breaker half-open");
            }
            CircuitState::Closed => {
                inner.next_attempt_at = None;
                inner.metrics.next_attempt = None;
                inner.metrics.consecutive_failures = 0;
                inner.half_open_successes = 0;
                tracing::info!(breaker = %self.name, %from, "circuit breaker closed");
            }
        }
        metrics::counter!(
            "circuit_breaker_transitions_total",
            "service" => self.name.clone(),
            "to" => to.as_str()
        )
        .increment(1);
    }

    /// Clears all counters and closes the circuit.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.metrics = CircuitBreakerMetrics::new(&self.name);
        inner.next_attempt_at = None;
        inner.last_failure_at = None;
        inner.half_open_successes = 0;
        tracing::info!(breaker = %self.name, "circuit breaker reset");
    }

    /// Opens the circuit regardless of counters.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        tracing::warn!(breaker = %self.name, "circuit breaker forced open");
        self.transition(&mut inner, CircuitState::Open);
    }

    /// Closes the circuit regardless of counters.
    pub fn force_close(&self) {
        let mut inner = self.inner.lock();
        tracing::warn!(breaker = %self.name, "circuit breaker forced closed");
        self.transition(&mut inner, CircuitState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn config(failure_threshold: u32, success_threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            reset_timeout: Duration::from_millis(100),
            monitoring_period: Duration::from_secs(60),
            success_threshold,
            timeout: None,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), ServiceError> {
        breaker
            .execute(|| async { Err::<(), _>(ServiceError::unavailable("down")) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<&'static str, ServiceError> {
        breaker.execute(|| async { Ok("ok") }).await
    }

    #[tokio::test]
    async fn test_success_is_counted() {
        let breaker = CircuitBreaker::new("inventory", config(3, 1));
        assert_eq!(succeed(&breaker).await.unwrap(), "ok");

        let metrics = breaker.metrics();
        assert_eq!(metrics.state, CircuitState::Closed);
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.successful_requests, 1);
        assert!(metrics.last_success_time.is_some());
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_fails_fast() {
        let breaker = CircuitBreaker::new("payment", config(3, 1));
        for _ in 0..2 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let invoked = Arc::new(AtomicU32::new(0));
        let counter = invoked.clone();
        let result = breaker
            .execute(|| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        match result {
            Err(ServiceError::CircuitOpen { service, metrics }) => {
                assert_eq!(service, "payment");
                assert_eq!(metrics.state, CircuitState::Open);
                assert_eq!(metrics.failed_requests, 3);
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.metrics().total_requests, 3);
        assert!(breaker.metrics().next_attempt.is_some());
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let breaker = CircuitBreaker::new("inventory", config(2, 1));
        let _ = fail(&breaker).await;
        succeed(&breaker).await.unwrap();
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_closes_circuit() {
        let breaker = CircuitBreaker::new("notification", config(1, 1));
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(101)).await;

        let invoked = Arc::new(AtomicU32::new(0));
        let counter = invoked.clone();
        breaker
            .execute(|| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.metrics().next_attempt.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_needs_success_threshold() {
        let breaker = CircuitBreaker::new("inventory", config(1, 2));
        let _ = fail(&breaker).await;
        tokio::time::advance(Duration::from_millis(150)).await;

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("payment", config(1, 2));
        let _ = fail(&breaker).await;
        tokio::time::advance(Duration::from_millis(150)).await;

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(
            succeed(&breaker).await,
            Err(ServiceError::CircuitOpen { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let mut cfg = config(1, 1);
        cfg.timeout = Some(Duration::from_millis(50));
        let breaker = CircuitBreaker::new("users", cfg);

        let result = breaker
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ServiceError::Timeout { .. })));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_half_open_call_reopens() {
        let breaker = CircuitBreaker::new("payment", config(1, 1));
        let _ = fail(&breaker).await;
        tokio::time::advance(Duration::from_millis(101)).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            breaker.execute(|| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }),
        )
        .await;

        assert!(abandoned.is_err());
        let metrics = breaker.metrics();
        assert_eq!(metrics.state, CircuitState::Open);
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.failed_requests, 2);
        assert!(matches!(
            succeed(&breaker).await,
            Err(ServiceError::CircuitOpen { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_streak_restarts_outside_monitoring_period() {
        let mut cfg = config(2, 1);
        cfg.monitoring_period = Duration::from_millis(500);
        let breaker = CircuitBreaker::new("inventory", cfg);

        let _ = fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        let _ = fail(&breaker).await;

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_operational_controls() {
        let breaker = CircuitBreaker::new("payment", config(5, 1));
        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(succeed(&breaker).await.is_err());

        breaker.force_close();
        assert_eq!(breaker.state(), CircuitState::Closed);
        succeed(&breaker).await.unwrap();

        breaker.reset();
        let metrics = breaker.metrics();
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.state, CircuitState::Closed);
    }

    #[test]
    fn test_failure_rate() {
        let mut metrics = CircuitBreakerMetrics::new("x");
        assert_eq!(metrics.failure_rate(), 0.0);
        metrics.total_requests = 4;
        metrics.failed_requests = 1;
        assert_eq!(metrics.failure_rate(), 0.25);
    }
}
