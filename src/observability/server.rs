//! HTTP endpoint exposing the live process's metrics.

use std::net::SocketAddr;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio_util::sync::CancellationToken;

use super::metrics;
use crate::error::ServerError;
use crate::storage::{status_report, Database};
use crate::Result;

/// Router with `/health` and `/metrics`.
#[must_use]
pub fn metrics_router(db: Database) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        .with_state(db)
}

async fn health_check(State(db): State<Database>) -> impl IntoResponse {
    match db.health_check() {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!(error = %e, "Database health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "database unavailable")
        }
    }
}

/// Prometheus metrics endpoint. Gauges are refreshed from the store on
/// every scrape; counters are whatever this process has recorded.
async fn render_metrics(State(db): State<Database>) -> impl IntoResponse {
    match db.with_conn(status_report) {
        Ok(report) => metrics::observe_status(&report),
        Err(e) => tracing::warn!(error = %e, "Failed to refresh status gauges"),
    }

    let content_type = [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")];
    match metrics::render() {
        Ok(body) => (StatusCode::OK, content_type, body),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                content_type,
                "Failed to encode metrics".to_string(),
            )
        }
    }
}

/// Serve [`metrics_router`] on `addr` until `cancel` fires.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve_metrics(addr: SocketAddr, db: Database, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::BindFailed {
            address: addr.to_string(),
            reason: e.to_string(),
        })?;

    tracing::info!(address = %addr, "Serving metrics");

    axum::serve(listener, metrics_router(db))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| ServerError::Serve(e.to_string()))?;

    tracing::info!("Metrics endpoint stopped");
    Ok(())
}
