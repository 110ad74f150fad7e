//! The internal HTTP server every binary in this workspace exposes
//! alongside its real traffic: a liveness probe and a Prometheus scrape
//! endpoint, nothing else.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::Router;

use crate::metrics::MetricsRegistry;
use crate::tracing::TracingHandle;

#[derive(Clone)]
struct AppState {
    metrics: MetricsRegistry,
    tracing_handle: Option<Arc<TracingHandle>>,
}

/// Builds the router served by the internal HTTP listener.
///
/// `tracing_handle` is `None` when the caller hasn't wired up reloadable
/// logging (e.g. in tests); the `/api/stderr/config` route then reports 404
/// instead of panicking.
pub fn router(metrics: MetricsRegistry, tracing_handle: Option<TracingHandle>) -> Router {
    Router::new()
        .route("/api/livez", get(handle_liveness_check))
        .route("/metrics", get(handle_prometheus))
        .route("/api/stderr/config", put(handle_reload_stderr_filter))
        .with_state(AppState {
            metrics,
            tracing_handle: tracing_handle.map(Arc::new),
        })
}

/// Binds `addr` and serves the internal HTTP router until the process exits
/// or the returned future is dropped.
pub async fn serve(
    addr: SocketAddr,
    metrics: MetricsRegistry,
    tracing_handle: Option<TracingHandle>,
) -> Result<(), anyhow::Error> {
    tracing::info!(%addr, "starting internal http server");
    axum::Server::bind(&addr)
        .serve(router(metrics, tracing_handle).into_make_service())
        .await?;
    Ok(())
}

async fn handle_liveness_check() -> impl IntoResponse {
    StatusCode::OK
}

async fn handle_prometheus(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.encode_text() {
        Ok(body) => (StatusCode::OK, body),
        Err(err) => {
            tracing::error!(error = %err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

/// `PUT /api/stderr/config` with a plain-text body of new filter directives
/// (the same syntax as `RUST_LOG`), applied without restarting the process.
async fn handle_reload_stderr_filter(State(state): State<AppState>, body: String) -> impl IntoResponse {
    match &state.tracing_handle {
        Some(handle) => match handle.reload_stderr_log_filter(body.trim()) {
            Ok(()) => (StatusCode::OK, String::new()),
            Err(err) => (StatusCode::BAD_REQUEST, format!("invalid filter: {err}")),
        },
        None => (StatusCode::NOT_FOUND, String::new()),
    }
}
