//! Command router - picks the delivery path for each administrative command.
//!
//! The decision is made per dispatch from the current remote configuration:
//! RCON when remote routing is active, the local process otherwise. Exactly
//! one path runs per command, and every outcome that is not a success is
//! written to the sink.

use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::console::{LogSource, Sink};
use crate::protocol::RemoteError;
use crate::supervisor::{StopError, WriteError};

pub const DEFAULT_RCON_PORT: u16 = 25575;

/// Local delivery path: the supervised process.
#[async_trait]
pub trait LocalTarget: Send + Sync {
    async fn write_line(&self, text: &str) -> Result<(), WriteError>;
    async fn stop(&self) -> Result<(), StopError>;
}

/// Remote delivery path: one RCON exchange per call.
#[async_trait]
pub trait RemoteConsole: Send + Sync {
    async fn command(&self, config: &RemoteSessionConfig, text: &str) -> Result<String, RemoteError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSessionConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub enabled: bool,
}

impl Default for RemoteSessionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_RCON_PORT,
            password: String::new(),
            enabled: false,
        }
    }
}

impl RemoteSessionConfig {
    /// Remote routing needs both the switch and a host.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.host.trim().is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub text: String,
    pub issued_at: SystemTime,
}

impl CommandRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            issued_at: SystemTime::now(),
        }
    }

    fn payload(&self) -> &str {
        self.text.trim_end_matches(['\r', '\n'])
    }

    fn is_stop(&self) -> bool {
        self.text.trim().eq_ignore_ascii_case("stop")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Local,
    Remote,
}

#[derive(Debug)]
pub enum RoutingOutcome {
    /// Blank command, nothing sent
    Ignored,
    /// Written to the local process's stdin
    Written,
    /// Terminate requested from the local supervisor
    StopRequested,
    /// RCON response body
    Remote(String),
    /// Neither path was available
    NoTarget,
    LocalFailed(WriteError),
    RemoteFailed(RemoteError),
}

impl RoutingOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Written | Self::StopRequested | Self::Remote(_))
    }

    /// Path the command took, if any.
    pub fn route(&self) -> Option<Route> {
        match self {
            Self::Written | Self::StopRequested | Self::LocalFailed(_) => Some(Route::Local),
            Self::Remote(_) | Self::RemoteFailed(_) => Some(Route::Remote),
            Self::Ignored | Self::NoTarget => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Ignored => "Empty command ignored".to_string(),
            Self::Written => "Command sent to local server".to_string(),
            Self::StopRequested => "Stop requested".to_string(),
            Self::Remote(response) => response.clone(),
            Self::NoTarget => "No local server running".to_string(),
            Self::LocalFailed(e) => e.to_string(),
            Self::RemoteFailed(e) => format!("RCON error: {}", e),
        }
    }
}

pub struct CommandRouter {
    local: Arc<dyn LocalTarget>,
    remote: Arc<dyn RemoteConsole>,
    config: RwLock<RemoteSessionConfig>,
    /// One delivery at a time per target
    local_gate: Mutex<()>,
    remote_gate: Mutex<()>,
    sink: Arc<dyn Sink>,
}

impl CommandRouter {
    pub fn new(
        local: Arc<dyn LocalTarget>,
        remote: Arc<dyn RemoteConsole>,
        config: RemoteSessionConfig,
        sink: Arc<dyn Sink>,
    ) -> Self {
        Self {
            local,
            remote,
            config: RwLock::new(config),
            local_gate: Mutex::new(()),
            remote_gate: Mutex::new(()),
            sink,
        }
    }

    pub fn remote_config(&self) -> RemoteSessionConfig {
        self.config.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn configure(&self, config: RemoteSessionConfig) {
        tracing::info!(
            "Remote session {} ({}:{})",
            if config.enabled { "enabled" } else { "disabled" },
            config.host,
            config.port
        );
        *self.config.write().unwrap_or_else(|p| p.into_inner()) = config;
    }

    pub async fn dispatch(&self, request: CommandRequest) -> RoutingOutcome {
        if request.text.trim().is_empty() {
            return RoutingOutcome::Ignored;
        }

        let config = self.remote_config();
        if config.is_active() {
            return self.dispatch_remote(&config, request.payload()).await;
        }

        let _gate = self.local_gate.lock().await;
        if request.is_stop() {
            return match self.local.stop().await {
                Ok(()) => RoutingOutcome::StopRequested,
                Err(StopError::NotRunning) => {
                    self.sink.append(LogSource::System, "No server running.\n");
                    RoutingOutcome::NoTarget
                }
            };
        }

        match self.local.write_line(request.payload()).await {
            Ok(()) => RoutingOutcome::Written,
            Err(WriteError::NotRunning) => {
                self.sink.append(LogSource::System, "No local server running.\n");
                RoutingOutcome::NoTarget
            }
            Err(e) => {
                tracing::warn!("Local command delivery failed: {}", e);
                self.sink.append(LogSource::System, &format!("{}\n", e));
                RoutingOutcome::LocalFailed(e)
            }
        }
    }

    /// Stop the server. With remote routing active this is an RCON `stop`,
    /// because the remote target may not be the local child.
    pub async fn stop(&self) -> RoutingOutcome {
        self.dispatch(CommandRequest::new("stop")).await
    }

    async fn dispatch_remote(&self, config: &RemoteSessionConfig, text: &str) -> RoutingOutcome {
        let _gate = self.remote_gate.lock().await;
        match self.remote.command(config, text).await {
            Ok(response) => {
                self.sink.append(LogSource::Rcon, &format!("[RCON] {}\n", response));
                RoutingOutcome::Remote(response)
            }
            Err(e) => {
                tracing::warn!("RCON command to {}:{} failed: {}", config.host, config.port, e);
                self.sink.append(LogSource::Rcon, &format!("RCON error: {}\n", e));
                RoutingOutcome::RemoteFailed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::Console;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeLocal {
        running: bool,
        writes: std::sync::Mutex<Vec<String>>,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl LocalTarget for FakeLocal {
        async fn write_line(&self, text: &str) -> Result<(), WriteError> {
            if !self.running {
                return Err(WriteError::NotRunning);
            }
            if text.contains(['\r', '\n']) {
                return Err(WriteError::InvalidCommand);
            }
            self.writes.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn stop(&self) -> Result<(), StopError> {
            if !self.running {
                return Err(StopError::NotRunning);
            }
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeRemote {
        fail_auth: bool,
        calls: std::sync::Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl RemoteConsole for FakeRemote {
        async fn command(&self, _config: &RemoteSessionConfig, text: &str) -> Result<String, RemoteError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.calls.lock().unwrap().push(text.to_string());
            if self.fail_auth {
                Err(RemoteError::AuthFailed)
            } else {
                Ok(format!("ran {}", text))
            }
        }
    }

    fn remote_on() -> RemoteSessionConfig {
        RemoteSessionConfig {
            host: "10.0.0.5".into(),
            port: 25575,
            password: "secret".into(),
            enabled: true,
        }
    }

    fn router(
        local: &Arc<FakeLocal>,
        remote: &Arc<FakeRemote>,
        config: RemoteSessionConfig,
        console: &Arc<Console>,
    ) -> CommandRouter {
        CommandRouter::new(local.clone(), remote.clone(), config, console.clone())
    }

    fn contents(console: &Console) -> Vec<String> {
        console.recent(100).into_iter().map(|l| l.content).collect()
    }

    #[tokio::test]
    async fn test_stop_goes_remote_when_active() {
        let local = Arc::new(FakeLocal { running: true, ..Default::default() });
        let remote = Arc::new(FakeRemote::default());
        let console = Arc::new(Console::new());
        let router = router(&local, &remote, remote_on(), &console);

        let outcome = router.stop().await;
        assert!(matches!(outcome, RoutingOutcome::Remote(_)));
        assert_eq!(outcome.route(), Some(Route::Remote));
        assert_eq!(*remote.calls.lock().unwrap(), vec!["stop"]);
        assert_eq!(local.stops.load(Ordering::SeqCst), 0);
        assert!(local.writes.lock().unwrap().is_empty());
        assert_eq!(contents(&console), vec!["[RCON] ran stop\n"]);
    }

    #[tokio::test]
    async fn test_stop_goes_local_when_remote_disabled() {
        let local = Arc::new(FakeLocal { running: true, ..Default::default() });
        let remote = Arc::new(FakeRemote::default());
        let console = Arc::new(Console::new());
        let mut config = remote_on();
        config.enabled = false;
        let router = router(&local, &remote, config, &console);

        let outcome = router.dispatch(CommandRequest::new("stop")).await;
        assert!(matches!(outcome, RoutingOutcome::StopRequested));
        assert_eq!(local.stops.load(Ordering::SeqCst), 1);
        assert!(local.writes.lock().unwrap().is_empty());
        assert!(remote.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enabled_without_host_stays_local() {
        let local = Arc::new(FakeLocal { running: true, ..Default::default() });
        let remote = Arc::new(FakeRemote::default());
        let console = Arc::new(Console::new());
        let mut config = remote_on();
        config.host = "  ".into();
        let router = router(&local, &remote, config, &console);

        let outcome = router.dispatch(CommandRequest::new("say hi\n")).await;
        assert!(matches!(outcome, RoutingOutcome::Written));
        assert_eq!(*local.writes.lock().unwrap(), vec!["say hi"]);
        assert!(remote.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_target_is_reported() {
        let local = Arc::new(FakeLocal::default());
        let remote = Arc::new(FakeRemote::default());
        let console = Arc::new(Console::new());
        let router = router(&local, &remote, RemoteSessionConfig::default(), &console);

        let outcome = router.dispatch(CommandRequest::new("say hi")).await;
        assert!(matches!(outcome, RoutingOutcome::NoTarget));
        assert!(!outcome.is_success());
        assert_eq!(contents(&console), vec!["No local server running.\n"]);

        let outcome = router.stop().await;
        assert!(matches!(outcome, RoutingOutcome::NoTarget));
        assert_eq!(contents(&console).last().unwrap(), "No server running.\n");
        assert!(remote.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_auth_failure_is_reported() {
        let local = Arc::new(FakeLocal { running: true, ..Default::default() });
        let remote = Arc::new(FakeRemote { fail_auth: true, ..Default::default() });
        let console = Arc::new(Console::new());
        let router = router(&local, &remote, remote_on(), &console);

        let outcome = router.dispatch(CommandRequest::new("list")).await;
        assert!(matches!(outcome, RoutingOutcome::RemoteFailed(RemoteError::AuthFailed)));
        let lines = contents(&console);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("RCON error:"));
        assert!(local.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_multi_line_command_is_reported() {
        let local = Arc::new(FakeLocal { running: true, ..Default::default() });
        let remote = Arc::new(FakeRemote::default());
        let console = Arc::new(Console::new());
        let router = router(&local, &remote, RemoteSessionConfig::default(), &console);

        let outcome = router.dispatch(CommandRequest::new("say a\nop attacker")).await;
        assert!(matches!(outcome, RoutingOutcome::LocalFailed(WriteError::InvalidCommand)));
        assert!(local.writes.lock().unwrap().is_empty());
        assert_eq!(contents(&console), vec!["Command must be a single line\n"]);
    }

    #[tokio::test]
    async fn test_blank_command_is_ignored() {
        let local = Arc::new(FakeLocal { running: true, ..Default::default() });
        let remote = Arc::new(FakeRemote::default());
        let console = Arc::new(Console::new());
        let router = router(&local, &remote, remote_on(), &console);

        assert!(matches!(router.dispatch(CommandRequest::new("   ")).await, RoutingOutcome::Ignored));
        assert!(remote.calls.lock().unwrap().is_empty());
        assert!(console.recent(10).is_empty());
    }

    #[tokio::test]
    async fn test_route_follows_config_changes() {
        let local = Arc::new(FakeLocal { running: true, ..Default::default() });
        let remote = Arc::new(FakeRemote::default());
        let console = Arc::new(Console::new());
        let router = router(&local, &remote, RemoteSessionConfig::default(), &console);

        router.dispatch(CommandRequest::new("time set day")).await;
        router.configure(remote_on());
        router.dispatch(CommandRequest::new("weather clear")).await;
        router.configure(RemoteSessionConfig { enabled: false, ..remote_on() });
        router.dispatch(CommandRequest::new("list")).await;

        assert_eq!(*local.writes.lock().unwrap(), vec!["time set day", "list"]);
        assert_eq!(*remote.calls.lock().unwrap(), vec!["weather clear"]);
    }

    #[tokio::test]
    async fn test_remote_dispatches_are_serialized() {
        let local = Arc::new(FakeLocal::default());
        let remote = Arc::new(FakeRemote::default());
        let console = Arc::new(Console::new());
        let router = Arc::new(router(&local, &remote, remote_on(), &console));

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let router = router.clone();
                tokio::spawn(async move { router.dispatch(CommandRequest::new(format!("say {}", i))).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_success());
        }
        assert_eq!(remote.calls.lock().unwrap().len(), 5);
        assert_eq!(remote.max_in_flight.load(Ordering::SeqCst), 1);
    }
}
