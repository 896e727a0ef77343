//! Circuit breaker inspection and manual control.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use resilience::CircuitBreakerMetrics;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct BreakerView {
    #[serde(flatten)]
    pub metrics: CircuitBreakerMetrics,
    pub failure_rate: f64,
}

impl From<CircuitBreakerMetrics> for BreakerView {
    fn from(metrics: CircuitBreakerMetrics) -> Self {
        Self {
            failure_rate: metrics.failure_rate(),
            metrics,
        }
    }
}

/// GET /circuit-breakers: lists every breaker, sorted by name.
pub async fn list(State(state): State<Arc<AppState>>) -> Json<Vec<BreakerView>> {
    Json(
        state
            .breakers
            .all_metrics()
            .into_iter()
            .map(BreakerView::from)
            .collect(),
    )
}

/// POST /circuit-breakers/reset: clears every breaker.
#[tracing::instrument(skip(state))]
pub async fn reset_all(State(state): State<Arc<AppState>>) -> Json<Vec<BreakerView>> {
    state.breakers.reset_all();
    tracing::info!(breakers = state.breakers.len(), "all circuit breakers reset by operator");
    list(State(state)).await
}

/// POST /circuit-breakers/{name}/{action}: `reset`, `open` or `close`.
#[tracing::instrument(skip(state))]
pub async fn control(
    State(state): State<Arc<AppState>>,
    Path((name, action)): Path<(String, String)>,
) -> Result<Json<CircuitBreakerMetrics>, ApiError> {
    let breaker = state
        .breakers
        .find(&name)
        .ok_or_else(|| ApiError::NotFound(format!("Circuit breaker {name} not found")))?;

    match action.as_str() {
        "reset" => breaker.reset(),
        "open" => breaker.force_open(),
        "close" => breaker.force_close(),
        other => {
            return Err(ApiError::BadRequest(format!(
                "Unknown circuit breaker action '{other}'"
            )));
        }
    }
    tracing::info!(service = %name, %action, state = %breaker.state(), "circuit breaker changed by operator");

    Ok(Json(breaker.metrics()))
}
