//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use resilience::{CircuitBreakerConfig, RetryPolicy};
use transaction::CoordinatorConfig;

/// Server and resilience configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `CB_FAILURE_THRESHOLD`: failures that open a circuit (default: `5`)
/// - `CB_RESET_TIMEOUT_MS`: time a circuit stays open (default: `60000`)
/// - `CB_SUCCESS_THRESHOLD`: half-open successes that close it (default: `2`)
/// - `CB_CALL_TIMEOUT_MS`: per-call timeout, `0` disables it (default: `10000`)
/// - `RETRY_MAX_RETRIES`: retries after the first attempt (default: `3`)
/// - `RETRY_INITIAL_DELAY_MS`: first backoff delay (default: `100`)
/// - `RETRY_MAX_DELAY_MS`: backoff ceiling (default: `30000`)
/// - `IDEMPOTENCY_TTL_SECS`: lifetime of idempotency records (default: `86400`)
/// - `IDEMPOTENCY_PURGE_INTERVAL_SECS`: how often expired records are dropped (default: `300`)
/// - `TRANSACTION_TIMEOUT_MS`: whole-transaction deadline (default: `30000`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub cb_failure_threshold: u32,
    pub cb_reset_timeout: Duration,
    pub cb_success_threshold: u32,
    pub cb_call_timeout: Option<Duration>,
    pub retry_max_retries: u32,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
    pub idempotency_ttl: Duration,
    pub idempotency_purge_interval: Duration,
    pub transaction_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let call_timeout_ms = env_or(
            "CB_CALL_TIMEOUT_MS",
            defaults.cb_call_timeout.map_or(0, |t| t.as_millis() as u64),
        );
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            cb_failure_threshold: env_or("CB_FAILURE_THRESHOLD", defaults.cb_failure_threshold),
            cb_reset_timeout: env_millis("CB_RESET_TIMEOUT_MS", defaults.cb_reset_timeout),
            cb_success_threshold: env_or("CB_SUCCESS_THRESHOLD", defaults.cb_success_threshold),
            cb_call_timeout: (call_timeout_ms > 0).then(|| Duration::from_millis(call_timeout_ms)),
            retry_max_retries: env_or("RETRY_MAX_RETRIES", defaults.retry_max_retries),
            retry_initial_delay: env_millis("RETRY_INITIAL_DELAY_MS", defaults.retry_initial_delay),
            retry_max_delay: env_millis("RETRY_MAX_DELAY_MS", defaults.retry_max_delay),
            idempotency_ttl: Duration::from_secs(env_or(
                "IDEMPOTENCY_TTL_SECS",
                defaults.idempotency_ttl.as_secs(),
            )),
            idempotency_purge_interval: Duration::from_secs(env_or(
                "IDEMPOTENCY_PURGE_INTERVAL_SECS",
                defaults.idempotency_purge_interval.as_secs(),
            )),
            transaction_timeout: env_millis("TRANSACTION_TIMEOUT_MS", defaults.transaction_timeout),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Breaker settings applied to every dependency.
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.cb_failure_threshold,
            reset_timeout: self.cb_reset_timeout,
            success_threshold: self.cb_success_threshold,
            timeout: self.cb_call_timeout,
            ..CircuitBreakerConfig::default()
        }
    }

    /// Retry policy shared by sagas and transactions.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry_max_retries,
            initial_delay: self.retry_initial_delay,
            max_delay: self.retry_max_delay,
            ..RetryPolicy::default()
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            default_timeout: self.transaction_timeout,
            idempotency_ttl: self.idempotency_ttl,
            retry: self.retry_policy(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            cb_failure_threshold: 5,
            cb_reset_timeout: Duration::from_secs(60),
            cb_success_threshold: 2,
            cb_call_timeout: Some(Duration::from_secs(10)),
            retry_max_retries: 3,
            retry_initial_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(30),
            idempotency_ttl: Duration::from_secs(24 * 60 * 60),
            idempotency_purge_interval: Duration::from_secs(300),
            transaction_timeout: Duration::from_secs(30),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(name, value = %raw, "ignoring unparseable setting");
            default
        }),
        Err(_) => default,
    }
}

fn env_millis(name: &str, default: Duration) -> Duration {
    Duration::from_millis(env_or(name, default.as_millis() as u64))
}
