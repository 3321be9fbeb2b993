//! Health endpoint
//!
//! Minimal liveness surface for container orchestration.

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use tracing::info;

/// Serve `GET /health` on the given port until the process exits.
pub async fn serve(port: u16) -> Result<()> {
    let app = Router::new().route("/health", get(health));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind health endpoint on port {port}"))?;
    info!(port, "health endpoint listening");
    axum::serve(listener, app)
        .await
        .context("health endpoint terminated")?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
