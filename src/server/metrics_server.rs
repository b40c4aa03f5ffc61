// src/server/metrics_server.rs

//! Serves `/healthz` and `/metrics` on a secondary bind address: a tiny
//! `axum` router over shared state, bound and served independently of the
//! main command-protocol listener.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::core::manager::SyncManager;
use crate::core::metrics;

/// Liveness only: whether this process can still reach its own registry.
/// Replication health (paralyzed clusters, window breaches) is reported
/// out-of-band through `/metrics` gauges and counters rather than through
/// this endpoint's status code, so a head-node's `503`-equivalent never
/// comes from here going down.
async fn healthz(State(manager): State<Arc<SyncManager>>) -> impl IntoResponse {
    match manager.registry.list_clusters().await {
        Ok(_) => (StatusCode::OK, "ok"),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "registry unavailable"),
    }
}

async fn metrics_handler() -> impl IntoResponse {
    metrics::gather_metrics()
}

pub async fn run(
    bind_address: &str,
    manager: Arc<SyncManager>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .with_state(manager);

    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!(bind_address, "metrics server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if shutdown_rx.recv().await.is_err() {
                warn!("metrics server shutdown channel closed unexpectedly");
            }
        })
        .await?;
    Ok(())
}
