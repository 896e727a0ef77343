//! Shared registry of circuit breakers keyed by dependency name.

use std::sync::Arc;

use dashmap::DashMap;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics};

/// Lazily creates one [`CircuitBreaker`] per dependency and hands out
/// shared references, so concurrent callers of the same dependency see
/// the same state.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    overrides: DashMap<String, CircuitBreakerConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Creates a registry whose breakers use `default_config`.
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            overrides: DashMap::new(),
            breakers: DashMap::new(),
        }
    }

    /// Sets the configuration for one dependency.
    ///
    /// Takes effect when that dependency's breaker is first created.
    pub fn configure(&self, name: impl Into<String>, config: CircuitBreakerConfig) -> &Self {
        self.overrides.insert(name.into(), config);
        self
    }

    /// Returns the breaker for `name`, creating it on first use.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }
        let entry = self.breakers.entry(name.to_string()).or_insert_with(|| {
            let config = self
                .overrides
                .get(name)
                .map(|c| c.value().clone())
                .unwrap_or_else(|| self.default_config.clone());
            Arc::new(CircuitBreaker::new(name, config))
        });
        Arc::clone(entry.value())
    }

    /// Returns the breaker for `name` only if it already exists.
    pub fn find(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| Arc::clone(b.value()))
    }

    /// Returns metrics for every breaker, sorted by name.
    pub fn all_metrics(&self) -> Vec<CircuitBreakerMetrics> {
        let mut all: Vec<_> = self.breakers.iter().map(|b| b.value().metrics()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Resets every breaker.
    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.value().reset();
        }
    }

    /// Returns the number of breakers created so far.
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Returns true if no breaker has been created.
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_get_or_create_shares_instances() {
        let registry = CircuitBreakerRegistry::default();
        let a = registry.get("inventory");
        let b = registry.get("inventory");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert!(registry.find("payment").is_none());
    }

    #[test]
    fn test_override_applies_on_creation() {
        let registry = CircuitBreakerRegistry::default();
        registry.configure(
            "payment",
            CircuitBreakerConfig {
                failure_threshold: 2,
                reset_timeout: Duration::from_secs(5),
                ..CircuitBreakerConfig::default()
            },
        );

        assert_eq!(registry.get("payment").config().failure_threshold, 2);
        assert_eq!(
            registry.get("inventory").config().failure_threshold,
            CircuitBreakerConfig::default().failure_threshold
        );
    }

    #[test]
    fn test_all_metrics_sorted() {
        let registry = CircuitBreakerRegistry::default();
        registry.get("users");
        registry.get("inventory");
        let names: Vec<_> = registry.all_metrics().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["inventory", "users"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_creates_one_breaker() {
        let registry = Arc::new(CircuitBreakerRegistry::default());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.get("payment") })
            })
            .collect();

        let first = registry.get("payment");
        for handle in handles {
            assert!(Arc::ptr_eq(&first, &handle.await.unwrap()));
        }
        assert_eq!(registry.len(), 1);
    }
}
