pub mod command;
pub mod console;
pub mod server;

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;

use crate::router::RoutingOutcome;
use crate::supervisor::WriteError;

/// 라우팅 결과 → HTTP 응답
pub(crate) fn outcome_response(outcome: RoutingOutcome) -> Response {
    let route = outcome.route();
    let message = outcome.message();

    if outcome.is_success() {
        return (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "route": route,
                "message": message,
            })),
        )
            .into_response();
    }

    let (status, error_code) = match &outcome {
        RoutingOutcome::Ignored => (StatusCode::BAD_REQUEST, "EMPTY_COMMAND"),
        RoutingOutcome::NoTarget => (StatusCode::CONFLICT, "NO_TARGET"),
        RoutingOutcome::LocalFailed(WriteError::InvalidCommand) => (StatusCode::BAD_REQUEST, "INVALID_COMMAND"),
        RoutingOutcome::LocalFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "LOCAL_WRITE_FAILED"),
        RoutingOutcome::RemoteFailed(e) => (StatusCode::BAD_GATEWAY, e.error_code()),
        // is_success() 에서 이미 처리됨
        RoutingOutcome::Written | RoutingOutcome::StopRequested | RoutingOutcome::Remote(_) => {
            (StatusCode::OK, "OK")
        }
    };

    (
        status,
        Json(json!({
            "success": false,
            "route": route,
            "error": message,
            "error_code": error_code,
        })),
    )
        .into_response()
}
