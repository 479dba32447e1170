//! HTTP API handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use super::types::{
    CreateSessionRequest, CreateSessionResponse, ErrorResponse, HealthResponse,
};
use super::AppState;

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
        sessions: state.bridge.registry().count(),
        source_attached: state.bridge.source_attached(),
        polling: state.bridge.is_polling(),
    })
}

pub async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), (StatusCode, Json<ErrorResponse>)> {
    let request = body.map(|Json(req)| req).unwrap_or_default();
    match state
        .bridge
        .registry()
        .create(request.session_id, request.workspace)
    {
        Ok(session) => {
            tracing::info!(session_id = %session.id, "session registered");
            let websocket_path = format!("/ws/{}", session.id);
            Ok((
                StatusCode::CREATED,
                Json(CreateSessionResponse {
                    session_id: session.id.clone(),
                    created_at: session.created_at,
                    websocket_path,
                }),
            ))
        }
        Err(err) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: err.to_string(),
                code: "session_limit".to_string(),
            }),
        )),
    }
}

/// Graceful restart: stop polling and cancel the server's shutdown token.
/// Process supervision (relaunching) belongs to whatever started us.
pub async fn restart(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    tracing::warn!("restart requested over HTTP");
    state.bridge.stop_polling();
    state.shutdown.cancel();
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "restarting" })),
    )
}
