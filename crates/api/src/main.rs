//! API server entry point.

use std::sync::Arc;

use api::config::Config;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing, then load settings so parse warnings are logged
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
    let config = Config::from_env();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Wire workflows over the in-memory services
    let addr = config.addr();
    let purge_interval = config.idempotency_purge_interval;
    let state = api::create_default_state(config);
    let demo_customer = state
        .services
        .users
        .add_active("Demo Customer", "demo@example.com");
    tracing::info!(customer_id = %demo_customer, "seeded demo customer");

    let purge = api::spawn_idempotency_purge(Arc::clone(&state.coordinator), purge_interval);

    // 4. Build the application
    let app = api::create_app(state, metrics_handle);

    // 5. Start server
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    purge.abort();
    tracing::info!("server shut down gracefully");
}
