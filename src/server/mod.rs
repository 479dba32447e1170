//! HTTP and websocket surface.
//!
//! Routes:
//! - `GET  /api/health`       liveness plus session and source counts
//! - `POST /api/session`      register (or re-register) a session
//! - `POST /api/restart`      stop polling and shut the server down
//! - `GET  /ws/{session_id}`  phone client stream
//! - `GET  /ws/bridge`        desktop bridge stream

mod handlers;
pub mod types;
mod ws;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::bridge::ChatBridge;
use crate::error::Result;
use crate::extract::QueueSource;
use crate::inject::SocketSink;
use crate::settings::BridgeSettings;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<ChatBridge>,
    /// The concrete queue the desktop bridge feeds; the `ChatBridge` only
    /// sees it as an `ExtractionSource`.
    pub source: Arc<QueueSource>,
    pub socket_sink: Arc<SocketSink>,
    pub replay_limit: usize,
    pub shutdown: CancellationToken,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/session", post(handlers::create_session))
        .route("/api/restart", post(handlers::restart))
        .route("/ws/{session_id}", get(ws::client_ws))
        .route("/ws/bridge", get(ws::bridge_ws))
        .with_state(state)
}

/// Bind and serve until the shutdown token fires.
pub async fn start_server(settings: &BridgeSettings, state: AppState) -> Result<()> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("server stopped");
    Ok(())
}
