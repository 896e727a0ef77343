//! Scripted failures and call counting for in-memory services.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use resilience::ServiceError;

#[derive(Debug, Default)]
struct OperationFaults {
    calls: u32,
    /// `None` with an error set means fail forever.
    remaining: Option<u32>,
    error: Option<ServiceError>,
    latency: Option<Duration>,
}

/// Per-operation fault plan shared by an in-memory service.
#[derive(Debug, Default)]
pub struct FaultInjector {
    operations: Mutex<HashMap<String, OperationFaults>>,
}

impl FaultInjector {
    /// Creates an injector with no faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` calls of `operation` fail with `error`.
    pub fn fail_times(&self, operation: &str, times: u32, error: ServiceError) {
        let mut ops = self.operations.lock();
        let entry = ops.entry(operation.to_string()).or_default();
        entry.remaining = Some(times);
        entry.error = Some(error);
    }

    /// Makes every call of `operation` fail with `error`.
    pub fn fail_always(&self, operation: &str, error: ServiceError) {
        let mut ops = self.operations.lock();
        let entry = ops.entry(operation.to_string()).or_default();
        entry.remaining = None;
        entry.error = Some(error);
    }

    /// Delays every call of `operation` by `latency`.
    pub fn set_latency(&self, operation: &str, latency: Duration) {
        self.operations
            .lock()
            .entry(operation.to_string())
            .or_default()
            .latency = Some(latency);
    }

    /// Removes any failure scripted for `operation`.
    pub fn clear(&self, operation: &str) {
        if let Some(entry) = self.operations.lock().get_mut(operation) {
            entry.error = None;
            entry.remaining = None;
            entry.latency = None;
        }
    }

    /// Returns how many times `operation` has been invoked.
    pub fn calls(&self, operation: &str) -> u32 {
        self.operations
            .lock()
            .get(operation)
            .map(|e| e.calls)
            .unwrap_or(0)
    }

    /// Records a call and returns the scripted failure, if any.
    ///
    /// Applies configured latency first.
    pub async fn enter(&self, operation: &str) -> Result<(), ServiceError> {
        let (latency, outcome) = {
            let mut ops = self.operations.lock();
            let entry = ops.entry(operation.to_string()).or_default();
            entry.calls += 1;
            let outcome = match (&entry.error, entry.remaining) {
                (Some(error), None) => Err(error.clone()),
                (Some(error), Some(n)) if n > 0 => {
                    let error = error.clone();
                    entry.remaining = Some(n - 1);
                    Err(error)
                }
                _ => Ok(()),
            };
            (entry.latency, outcome)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Err(error) = &outcome {
            tracing::debug!(operation, %error, "injected failure");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fail_times_then_recover() {
        let faults = FaultInjector::new();
        faults.fail_times("reserve", 2, ServiceError::unavailable("down"));

        assert!(faults.enter("reserve").await.is_err());
        assert!(faults.enter("reserve").await.is_err());
        assert!(faults.enter("reserve").await.is_ok());
        assert_eq!(faults.calls("reserve"), 3);
        assert_eq!(faults.calls("release"), 0);
    }

    #[tokio::test]
    async fn test_fail_always_until_cleared() {
        let faults = FaultInjector::new();
        faults.fail_always("charge", ServiceError::status(502, "bad gateway"));
        for _ in 0..5 {
            assert!(faults.enter("charge").await.is_err());
        }
        faults.clear("charge");
        assert!(faults.enter("charge").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_applied() {
        let faults = FaultInjector::new();
        faults.set_latency("send", Duration::from_millis(300));
        let start = tokio::time::Instant::now();
        faults.enter("send").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(300));
    }
}
