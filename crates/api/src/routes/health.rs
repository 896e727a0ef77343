//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use resilience::CircuitState;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Dependencies whose circuit is currently open.
    pub open_circuits: Vec<String>,
}

/// GET /health: reports `degraded` while any dependency's circuit is open.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let open_circuits: Vec<String> = state
        .breakers
        .all_metrics()
        .into_iter()
        .filter(|m| m.state == CircuitState::Open)
        .map(|m| m.name)
        .collect();

    let status = if open_circuits.is_empty() {
        "ok"
    } else {
        "degraded"
    };
    Json(HealthResponse {
        status,
        open_circuits,
    })
}
