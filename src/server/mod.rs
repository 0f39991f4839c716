//! HTTP and WebSocket transport over the [`Orchestrator`].

pub mod api;
pub mod ws;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::orchestrator::Orchestrator;

pub use api::{ApiError, AppState, SharedState};

/// Build the full application router: JSON API plus the event stream.
pub fn build_router(state: SharedState, cors_permissive: bool) -> Router {
    let app = api::api_router()
        .route("/ws/{session_id}", get(ws::ws_handler))
        .with_state(state);
    if cors_permissive {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Bind and serve until Ctrl+C, then tear down every session.
pub async fn start_server(config: &ServerConfig, orchestrator: Orchestrator) -> Result<()> {
    let state = Arc::new(AppState {
        orchestrator: orchestrator.clone(),
    });
    let app = build_router(state, config.cors_permissive);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "MACC API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    orchestrator.shutdown();
    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C; shutting down");
        return;
    }
    info!("shutdown requested");
}
