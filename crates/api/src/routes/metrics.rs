//! Prometheus metrics endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use resilience::{CircuitBreakerRegistry, CircuitState};

/// State of the metrics router.
#[derive(Clone)]
pub struct MetricsState {
    pub handle: PrometheusHandle,
    pub breakers: Arc<CircuitBreakerRegistry>,
}

/// GET /metrics: returns Prometheus-formatted metrics.
///
/// Breaker states are sampled into the `circuit_breaker_state` gauge
/// (0 closed, 1 half-open, 2 open) right before rendering.
pub async fn get(State(state): State<MetricsState>) -> impl IntoResponse {
    for breaker in state.breakers.all_metrics() {
        let value = match breaker.state {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        };
        metrics::gauge!("circuit_breaker_state", "service" => breaker.name).set(value);
    }

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.handle.render(),
    )
}
