use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use super::super::{ConsoleQuery, IPCServer};

const DEFAULT_CONSOLE_COUNT: usize = 100;

/// GET /api/console?since=<id>&count=<n>
pub async fn get_console(
    State(state): State<IPCServer>,
    Query(query): Query<ConsoleQuery>,
) -> impl IntoResponse {
    let console = state.manager.console();
    let lines = match query.since {
        Some(since_id) => console.since(since_id),
        None => console.recent(query.count.unwrap_or(DEFAULT_CONSOLE_COUNT)),
    };
    (StatusCode::OK, Json(json!({ "lines": lines }))).into_response()
}
