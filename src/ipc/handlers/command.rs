use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use super::super::{CommandRequest, IPCServer, RconRequest};
use super::outcome_response;

/// POST /api/command - 로컬 stdin 또는 RCON으로 전달
pub async fn send_command(
    State(state): State<IPCServer>,
    Json(req): Json<CommandRequest>,
) -> impl IntoResponse {
    outcome_response(state.manager.send_command(&req.command).await)
}

/// GET /api/rcon - 비밀번호는 노출하지 않음
pub async fn get_rcon(State(state): State<IPCServer>) -> impl IntoResponse {
    let status = state.manager.status().await;
    (StatusCode::OK, Json(status.remote)).into_response()
}

/// PUT /api/rcon
pub async fn configure_rcon(
    State(state): State<IPCServer>,
    Json(req): Json<RconRequest>,
) -> impl IntoResponse {
    match state
        .manager
        .configure_remote(&req.host, req.port, &req.password, req.enabled)
    {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "host": req.host.trim(),
                "port": req.port,
                "enabled": req.enabled,
            })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
