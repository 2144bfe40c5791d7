// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};
use axum::{routing::get, Router};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::session::TelemetrySession;
use crate::infrastructure::config::load_telemetry_config;
use crate::infrastructure::socketio_transport::SocketIoTransport;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    get_connection, get_diagnostics, get_machine, get_summary, health_check, list_machines, put_interest,
    stream_snapshots,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = load_telemetry_config()?;
    let addr: SocketAddr = config.http.bind.parse()?;

    // Start the ingestion session (connection, subscriptions, flush timer)
    let transport = Arc::new(SocketIoTransport::new(config.server.namespace.clone()));
    let session = TelemetrySession::start(&config, transport);

    // Create application state
    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState {
        query: session.query().clone(),
        registry: session.registry().clone(),
        shutdown: shutdown.clone(),
    });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/machines", get(list_machines))
        .route("/machines/:id", get(get_machine))
        .route("/summary", get(get_summary))
        .route("/connection", get(get_connection))
        .route("/diagnostics", get(get_diagnostics))
        .route("/interest", axum::routing::put(put_interest))
        .route("/stream", get(stream_snapshots))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    tracing::info!("Starting weld-telemetry service on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
            // Open streams never finish on their own
            shutdown.cancel();
        })
        .await;

    session.shutdown().await;
    served?;

    Ok(())
}
