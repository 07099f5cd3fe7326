use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use super::super::IPCServer;
use super::outcome_response;

/// GET /api/servers - 마지막 스캔 결과
pub async fn list_servers(State(state): State<IPCServer>) -> impl IntoResponse {
    let servers = state.manager.list_servers();
    (StatusCode::OK, Json(json!({ "servers": servers }))).into_response()
}

/// POST /api/servers/refresh - 서버 폴더 재스캔
pub async fn refresh_servers(State(state): State<IPCServer>) -> impl IntoResponse {
    match state.manager.refresh_registry() {
        Ok(servers) => (StatusCode::OK, Json(json!({ "servers": servers }))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/servers/:name/start
pub async fn start_server(
    Path(name): Path<String>,
    State(state): State<IPCServer>,
) -> impl IntoResponse {
    match state.manager.start_server(&name).await {
        Ok(info) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "server": info.server,
                "pid": info.pid,
                "generation": info.generation,
            })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/server/stop - 원격 세션이 켜져 있으면 RCON `stop`
pub async fn stop_server(State(state): State<IPCServer>) -> impl IntoResponse {
    outcome_response(state.manager.stop_server().await)
}

/// GET /api/status
pub async fn get_status(State(state): State<IPCServer>) -> impl IntoResponse {
    let status = state.manager.status().await;
    (StatusCode::OK, Json(status)).into_response()
}
