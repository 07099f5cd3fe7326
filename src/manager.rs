//! The command surface used by every front end (IPC, interactive console).
//!
//! Each operation reports its failures to the console before returning them,
//! so an operator watching the console sees every error even when the caller
//! ignores the result.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use serde::Serialize;
use tokio::sync::watch;

use crate::config::GlobalConfig;
use crate::console::{Console, LogSource, Sink};
use crate::protocol::rcon::RemoteSession;
use crate::registry::{RegistryError, ServerDefinition, ServerRegistry};
use crate::router::{CommandRequest, CommandRouter, RemoteConsole, RemoteSessionConfig, RoutingOutcome};
use crate::supervisor::{ExitReport, ProcessInfo, ProcessSupervisor, StartError, State};

#[derive(thiserror::Error, Debug)]
pub enum ManagerError {
    #[error("Server '{0}' not found")]
    UnknownServer(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Start(#[from] StartError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ManagerError {
    /// HTTP 상태 코드 매핑
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownServer(_) => StatusCode::NOT_FOUND,
            Self::Start(StartError::AlreadyRunning) => StatusCode::CONFLICT,
            Self::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Self::Registry(_) | Self::Start(StartError::SpawnFailed(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownServer(_) => "UNKNOWN_SERVER",
            Self::Registry(_) => "REGISTRY_ERROR",
            Self::Start(StartError::AlreadyRunning) => "ALREADY_RUNNING",
            Self::Start(StartError::SpawnFailed(_)) => "SPAWN_FAILED",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "error_code": self.error_code(),
        })
    }
}

/// axum 핸들러에서 ManagerError를 직접 반환할 수 있도록 IntoResponse 구현
impl axum::response::IntoResponse for ManagerError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = axum::Json(self.to_json());
        (status, body).into_response()
    }
}

/// Remote settings as shown to clients; the password never leaves the daemon.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteStatus {
    pub host: String,
    pub port: u16,
    pub enabled: bool,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub state: State,
    pub process: Option<ProcessInfo>,
    pub last_exit: Option<ExitReport>,
    pub remote: RemoteStatus,
}

pub struct Manager {
    registry: ServerRegistry,
    supervisor: ProcessSupervisor,
    router: CommandRouter,
    console: Arc<Console>,
}

impl Manager {
    pub fn new(config: &GlobalConfig) -> Self {
        let console = Arc::new(Console::with_capacity(config.log_buffer_size));
        let registry = ServerRegistry::new(&config.servers_dir, &config.artifact_extension);
        let supervisor = ProcessSupervisor::new(config.launch_options(), console.clone());
        let remote = Arc::new(RemoteSession::new(config.rcon_timeout()));
        Self::from_parts(registry, supervisor, remote, config.remote_session(), console)
    }

    /// Assemble from ready-made parts; the router drives `supervisor` locally.
    pub fn from_parts(
        registry: ServerRegistry,
        supervisor: ProcessSupervisor,
        remote: Arc<dyn RemoteConsole>,
        remote_config: RemoteSessionConfig,
        console: Arc<Console>,
    ) -> Self {
        let router = CommandRouter::new(
            Arc::new(supervisor.clone()),
            remote,
            remote_config,
            console.clone(),
        );
        Self {
            registry,
            supervisor,
            router,
            console,
        }
    }

    /// First scan on startup. Creates the servers root if it is missing.
    pub fn initialize(&self) -> Result<Vec<ServerDefinition>, ManagerError> {
        if let Err(e) = self.registry.ensure_root() {
            tracing::warn!("Cannot create {}: {}", self.registry.root().display(), e);
        }
        let servers = self.refresh_registry()?;
        if servers.is_empty() {
            self.console.append(
                LogSource::System,
                &format!(
                    "No server folders found in {}. Place your server folders there.\n",
                    self.registry.root().display()
                ),
            );
        }
        Ok(servers)
    }

    fn report(&self, error: ManagerError) -> ManagerError {
        self.console.append(LogSource::System, &format!("{}\n", error));
        error
    }

    pub fn console(&self) -> &Arc<Console> {
        &self.console
    }

    pub fn list_servers(&self) -> Vec<ServerDefinition> {
        self.registry.list()
    }

    pub fn refresh_registry(&self) -> Result<Vec<ServerDefinition>, ManagerError> {
        self.registry
            .refresh()
            .map_err(|e| self.report(ManagerError::Registry(e)))
    }

    pub async fn start_server(&self, name: &str) -> Result<ProcessInfo, ManagerError> {
        let definition = self
            .registry
            .get(name)
            .ok_or_else(|| self.report(ManagerError::UnknownServer(name.to_string())))?;
        self.supervisor
            .start(&definition)
            .await
            .map_err(|e| self.report(ManagerError::Start(e)))
    }

    pub async fn stop_server(&self) -> RoutingOutcome {
        self.router.stop().await
    }

    pub async fn send_command(&self, text: &str) -> RoutingOutcome {
        self.router.dispatch(CommandRequest::new(text)).await
    }

    pub fn configure_remote(
        &self,
        host: &str,
        port: u16,
        password: &str,
        enabled: bool,
    ) -> Result<(), ManagerError> {
        let host = host.trim();
        if enabled && host.is_empty() {
            return Err(self.report(ManagerError::InvalidConfig("RCON host is required".to_string())));
        }
        if port == 0 {
            return Err(self.report(ManagerError::InvalidConfig("RCON port must be non-zero".to_string())));
        }

        self.router.configure(RemoteSessionConfig {
            host: host.to_string(),
            port,
            password: password.to_string(),
            enabled,
        });
        let message = if enabled {
            format!("RCON configured: {}:{}\n", host, port)
        } else {
            "RCON disabled.\n".to_string()
        };
        self.console.append(LogSource::System, &message);
        Ok(())
    }

    pub async fn status(&self) -> Status {
        let remote = self.router.remote_config();
        Status {
            state: self.supervisor.state().await,
            process: self.supervisor.info().await,
            last_exit: self.supervisor.last_exit().await,
            remote: RemoteStatus {
                active: remote.is_active(),
                host: remote.host,
                port: remote.port,
                enabled: remote.enabled,
            },
        }
    }

    /// Lifecycle state changes of the local process.
    pub fn state_updates(&self) -> watch::Receiver<State> {
        self.supervisor.subscribe()
    }

    /// Stop the local child, whatever the routing mode, and wait for it to go.
    pub async fn shutdown(&self, timeout: Duration) {
        if self.supervisor.stop().await.is_err() {
            return;
        }
        let mut state = self.state_updates();
        let idle = tokio::time::timeout(timeout, async {
            state.wait_for(|s| *s == State::Idle).await.map(|_| ())
        })
        .await;
        if !matches!(idle, Ok(Ok(()))) {
            tracing::warn!("Server did not stop within {}s of shutdown", timeout.as_secs());
        }
    }
}
