//! HTTP transport: `POST /rpc` and `GET /health`.

use std::io;
use std::net::SocketAddr;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::RpcService;
use crate::rpc::RpcResponse;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub tools: usize,
    pub services: usize,
}

pub fn router(service: RpcService) -> Router {
    Router::new()
        .route("/rpc", post(rpc_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Bind `addr` and serve until the process exits.
pub async fn serve(service: RpcService, addr: &str) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_listener(service, listener).await
}

pub async fn serve_listener(service: RpcService, listener: TcpListener) -> io::Result<()> {
    let local: SocketAddr = listener.local_addr()?;
    info!("JSON-RPC server listening on http://{}/rpc", local);
    axum::serve(listener, router(service).into_make_service()).await
}

async fn rpc_handler(State(service): State<RpcService>, body: String) -> Json<RpcResponse> {
    Json(service.handle_body(&body).await)
}

async fn health_handler(State(service): State<RpcService>) -> Json<HealthResponse> {
    let registry = service.dispatcher().registry();
    Json(HealthResponse {
        status: "ok".to_string(),
        tools: registry.len(),
        services: registry.service_count(),
    })
}
