//! # Prometheus Endpoint
//!
//! Serves the engine's [`GossipMetrics`] at `/metrics` when the node is
//! started with `--metrics-port`. The registry itself lives in the protocol
//! crate; this module only renders it over HTTP.

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use rumor_protocol::GossipMetrics;

/// Builds the metrics router.
pub fn router(metrics: GossipMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Binds `port` and serves `/metrics` until the task is dropped.
pub async fn serve(port: u16, metrics: GossipMetrics) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", addr))?;
    tracing::info!("metrics server listening on {}", addr);

    axum::serve(listener, router(metrics))
        .await
        .context("metrics server failed")
}

/// Axum handler that renders `/metrics` in Prometheus text format.
///
/// Returns HTTP 500 if encoding fails (should never happen in practice).
async fn metrics_handler(State(metrics): State<GossipMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
