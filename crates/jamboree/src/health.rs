//! Liveness endpoint for container platforms.

use crate::registry::SessionRegistry;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::{routing::get, Json, Router};
use std::future::Future;
use std::time::Instant;
use tracing::info;

/// Shared by the health handlers.
#[derive(Clone)]
pub struct HealthState {
    pub registry: SessionRegistry,
    pub start_time: Instant,
}

/// Liveness plus the number of installed sessions.
pub async fn handle_health(State(state): State<HealthState>) -> Json<serde_json::Value> {
    let uptime = state.start_time.elapsed();

    Json(serde_json::json!({
        "status": "healthy",
        "uptime_secs": uptime.as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.registry.len(),
    }))
}

pub fn router(registry: SessionRegistry) -> Router {
    let state = HealthState {
        registry,
        start_time: Instant::now(),
    };
    Router::new()
        .route("/", get(handle_health))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Serve the health router on `host:port` until `shutdown` resolves.
pub async fn serve<F>(host: String, port: u16, registry: SessionRegistry, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind health endpoint to {}", addr))?;

    info!("Health: GET http://{}/health", addr);

    axum::serve(listener, router(registry))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Health server error")
}
