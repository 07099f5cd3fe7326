pub mod handlers;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::manager::Manager;

/// IPC 요청/응답 타입
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RconRequest {
    pub host: String,
    #[serde(default = "default_rcon_port")]
    pub port: u16,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_rcon_port() -> u16 {
    crate::router::DEFAULT_RCON_PORT
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsoleQuery {
    pub since: Option<u64>,
    pub count: Option<usize>,
}

#[derive(Clone)]
pub struct IPCServer {
    pub manager: Arc<Manager>,
    listen_addr: String,
}

impl IPCServer {
    pub fn new(manager: Arc<Manager>, listen_addr: &str) -> Self {
        Self {
            manager,
            listen_addr: listen_addr.to_string(),
        }
    }

    /// 라우트 구성 (테스트에서는 이 Router를 직접 oneshot으로 호출)
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/servers", get(handlers::server::list_servers))
            .route("/api/servers/refresh", post(handlers::server::refresh_servers))
            .route("/api/servers/:name/start", post(handlers::server::start_server))
            .route("/api/server/stop", post(handlers::server::stop_server))
            .route("/api/status", get(handlers::server::get_status))
            .route("/api/command", post(handlers::command::send_command))
            .route(
                "/api/rcon",
                get(handlers::command::get_rcon).put(handlers::command::configure_rcon),
            )
            .route("/api/console", get(handlers::console::get_console))
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    pub async fn start(self) -> Result<()> {
        tracing::info!("IPC HTTP server starting on {}", self.listen_addr);
        let router = self.router();

        let listener = tokio::net::TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("IPC listening on http://{}", self.listen_addr);

        axum::serve(listener, router).await?;
        Ok(())
    }
}
