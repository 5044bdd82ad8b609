//! Liveness endpoint served next to the pacers

use anyhow::Result;
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub fn create_router() -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "OK\n"
}

/// Serve the health endpoint until the listener fails
pub async fn serve(listener: TcpListener) -> Result<()> {
    tracing::info!("Health endpoint listening on {}", listener.local_addr()?);
    axum::serve(listener, create_router()).await?;
    Ok(())
}
