//! HTTP API over the order workflows.
//!
//! Places orders through the placement saga, cancels them through a
//! distributed transaction and exposes the circuit breakers guarding the
//! downstream services, with structured logging (tracing) and Prometheus
//! metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use transaction::TransactionCoordinator;

pub use state::{AppState, InMemoryServices, create_default_state};

use routes::metrics::MetricsState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(MetricsState {
            handle: metrics_handle,
            breakers: Arc::clone(&state.breakers),
        });

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::place))
        .route("/orders/{id}/cancel", post(routes::orders::cancel))
        .route("/sagas/{id}", get(routes::sagas::get))
        .route("/transactions/{id}", get(routes::transactions::get))
        .route("/circuit-breakers", get(routes::circuit_breakers::list))
        .route("/circuit-breakers/reset", post(routes::circuit_breakers::reset_all))
        .route(
            "/circuit-breakers/{name}/{action}",
            post(routes::circuit_breakers::control),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Spawns a task that drops expired idempotency records every `period`.
pub fn spawn_idempotency_purge(
    coordinator: Arc<TransactionCoordinator>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // interval panics on a zero period
        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = coordinator.purge_expired().await;
            if removed > 0 {
                tracing::info!(removed, "purged expired idempotency records");
            }
        }
    })
}
