//! Axum HTTP gateway: a health probe and the WebSocket chat endpoint.
//!
//! HTTP routes carry a body limit (64KB) and a request timeout; WebSocket
//! connections run in their own task once upgraded and are not subject to it.

pub mod ws;

use crate::agent::TurnOptions;
use crate::config::Config;
use crate::providers::Provider;
use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB)
pub const MAX_BODY_SIZE: usize = 65_536;

/// Shared, read-only state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn Provider>,
    pub options: TurnOptions,
    /// Root for per-session file managers; `None` disables tool calls.
    pub sandbox_root: Option<PathBuf>,
    pub request_timeout_secs: u64,
}

impl AppState {
    pub fn new(provider: Arc<dyn Provider>, config: &Config, sandbox_root: Option<PathBuf>) -> Self {
        Self {
            provider,
            options: TurnOptions::from_config(config),
            sandbox_root,
            request_timeout_secs: config.gateway.request_timeout_secs,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.request_timeout_secs);
    Router::new()
        .route("/health", get(handle_health))
        .route("/ws/chat", get(ws::handle_ws_chat))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
}

/// Serve the gateway on an already bound listener until Ctrl-C.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("Gateway server failed")
}

pub async fn run_gateway(host: &str, port: u16, state: AppState) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("Invalid gateway address {host}:{port}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let local = listener.local_addr()?;

    tracing::info!(
        %local,
        tools = state.sandbox_root.is_some(),
        "Gateway listening"
    );
    println!("Gateway listening on http://{local}");
    println!("  GET  /health");
    println!("  GET  /ws/chat  (WebSocket)");

    serve(listener, state).await
}

/// GET /health
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
