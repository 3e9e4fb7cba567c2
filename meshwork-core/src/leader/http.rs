//! HTTP control surface
//!
//! Thin routes over the leader's operations. Every route answers GET and POST
//! with the `{"success", "message"}` envelope.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use super::{Leader, Response};
use crate::error::{MeshError, Result};
use crate::metrics;

/// Build the control router
pub fn router(leader: Arc<Leader>) -> Router {
    Router::new()
        .route("/start", get(start).post(start))
        .route("/stop", get(stop).post(stop))
        .route("/status", get(status).post(status))
        .route("/metrics", get(worker_metrics).post(worker_metrics))
        .route("/cache", get(cache).post(cache))
        .route("/config", get(topology).post(topology))
        .route("/prometheus", get(prometheus))
        .layer(CorsLayer::permissive())
        .with_state(leader)
}

/// Serve the control surface until the leader exits
pub async fn serve(leader: Arc<Leader>, listener: TcpListener) -> Result<()> {
    let shutdown = leader.shutdown_signal();
    let addr = listener.local_addr()?;
    info!("Leader: {} control surface listening on {}", leader.name(), addr);

    axum::serve(listener, router(leader))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .map_err(MeshError::Io)
}

/// Bind `0.0.0.0:port` and serve
pub async fn bind_and_serve(leader: Arc<Leader>, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await.map_err(|e| MeshError::BindFailed {
        endpoint: addr.to_string(),
        reason: e.to_string(),
    })?;
    serve(leader, listener).await
}

async fn start(State(leader): State<Arc<Leader>>) -> Response {
    leader.start().await
}

async fn stop(State(leader): State<Arc<Leader>>) -> Response {
    leader.stop().await
}

async fn status(State(leader): State<Arc<Leader>>) -> Response {
    leader.status().await
}

async fn worker_metrics(State(leader): State<Arc<Leader>>) -> Response {
    leader.metrics().await
}

async fn cache(State(leader): State<Arc<Leader>>) -> Response {
    leader.cache()
}

async fn topology(State(leader): State<Arc<Leader>>) -> Response {
    leader.topology().await
}

async fn prometheus() -> String {
    metrics::gather_node_metrics()
}
