//! Process supervisor - owns the lifecycle of at most one server process.
//!
//! All lifecycle state sits behind one async mutex. `start`, `stop`,
//! `write_line` and the exit callback take it, so two concurrent starts can
//! never both succeed and stdin is never written after the process left
//! `Running`.
//!
//! Exit is detected when the output relay hits end-of-stream. The child's
//! exit status is only logged; polling it would race with output draining.

pub mod error;
pub mod launch;
pub mod relay;
pub mod state_machine;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::{oneshot, watch, Mutex, MutexGuard};

use crate::console::{LogSource, Sink};
use crate::registry::ServerDefinition;
use crate::router::LocalTarget;
pub use error::{StartError, StopError, WriteError};
pub use launch::LaunchOptions;
use relay::{OutputRelay, RelaySummary};
pub use state_machine::State;
use state_machine::StateMachine;

/// Upper bound for one stdin write; a child that stopped reading its input
/// must not hold the supervisor lock forever.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot of the running process handed out to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub server: String,
    pub pid: u32,
    pub working_dir: PathBuf,
    /// Increments with every spawn
    pub generation: u64,
    /// Unix timestamp (seconds)
    pub started_at: u64,
}

/// How the last process generation ended.
#[derive(Debug, Clone, Serialize)]
pub struct ExitReport {
    pub server: String,
    pub generation: u64,
    /// No stop was requested before the output closed
    pub crashed: bool,
    /// Output lines relayed during the generation
    pub lines: u64,
}

struct ServerProcess {
    info: ProcessInfo,
    stdin: ChildStdin,
    stop_requested: bool,
    /// Taken when a kill is requested. Dropping it lets the reaper clean up.
    kill_tx: Option<oneshot::Sender<()>>,
}

struct Inner {
    machine: StateMachine,
    process: Option<ServerProcess>,
    next_generation: u64,
    last_exit: Option<ExitReport>,
    exits: u64,
}

#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Mutex<Inner>>,
    state_tx: Arc<watch::Sender<State>>,
    launch: Arc<LaunchOptions>,
    sink: Arc<dyn Sink>,
}

impl ProcessSupervisor {
    pub fn new(launch: LaunchOptions, sink: Arc<dyn Sink>) -> Self {
        let (state_tx, _) = watch::channel(State::Idle);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                machine: StateMachine::new(),
                process: None,
                next_generation: 1,
                last_exit: None,
                exits: 0,
            })),
            state_tx: Arc::new(state_tx),
            launch: Arc::new(launch),
            sink,
        }
    }

    fn set_state(&self, inner: &mut MutexGuard<'_, Inner>, to: State) {
        if let Err(e) = inner.machine.transition(to) {
            tracing::error!("Supervisor state error: {}", e);
        }
        self.state_tx.send_replace(inner.machine.state());
    }

    /// Spawn `definition` as the supervised process.
    ///
    /// Returns once the child is spawned; the supervisor does not wait for the
    /// server to report that it is ready.
    pub async fn start(&self, definition: &ServerDefinition) -> Result<ProcessInfo, StartError> {
        let mut inner = self.inner.lock().await;
        if inner.machine.state() != State::Idle {
            return Err(StartError::AlreadyRunning);
        }
        self.set_state(&mut inner, State::Starting);

        let generation = inner.next_generation;
        inner.next_generation += 1;

        let spawned = match launch::spawn_server(&self.launch, definition) {
            Ok(spawned) => spawned,
            Err(e) => {
                tracing::warn!("Failed to start '{}': {}", definition.name, e);
                self.set_state(&mut inner, State::Idle);
                return Err(StartError::SpawnFailed(e));
            }
        };
        let launch::Spawned { mut child, pid, stdin, output } = spawned;

        let done_rx = match OutputRelay::new(self.sink.clone()).spawn(output, generation) {
            Ok(rx) => rx,
            Err(e) => {
                tracing::error!("Failed to start output relay for PID {}: {}", pid, e);
                if let Err(kill_err) = child.start_kill() {
                    tracing::error!("Failed to kill PID {}: {}", pid, kill_err);
                }
                tokio::spawn(async move {
                    let _ = child.wait().await;
                });
                self.set_state(&mut inner, State::Idle);
                return Err(StartError::SpawnFailed(e));
            }
        };

        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(launch::reap(child, kill_rx, pid));

        let info = ProcessInfo {
            server: definition.name.clone(),
            pid,
            working_dir: definition.working_dir().to_path_buf(),
            generation,
            started_at: current_timestamp(),
        };
        inner.process = Some(ServerProcess {
            info: info.clone(),
            stdin,
            stop_requested: false,
            kill_tx: Some(kill_tx),
        });
        self.set_state(&mut inner, State::Running);

        let supervisor = self.clone();
        tokio::spawn(async move {
            // A closed channel means the relay thread died; the stream is gone either way.
            let summary = done_rx.await.ok();
            supervisor.on_output_closed(generation, summary).await;
        });

        self.sink.append(
            LogSource::System,
            &format!("Server '{}' started with PID {}\n", definition.name, pid),
        );
        Ok(info)
    }

    /// Request termination of the running process.
    ///
    /// Returns right after the request is sent. The state reaches `Idle` when
    /// the output stream closes; a process still alive after the configured
    /// stop timeout is killed.
    pub async fn stop(&self) -> Result<(), StopError> {
        let mut inner = self.inner.lock().await;
        if inner.machine.state() != State::Running || inner.process.is_none() {
            return Err(StopError::NotRunning);
        }
        self.set_state(&mut inner, State::Stopping);

        let Some(process) = inner.process.as_mut() else {
            return Err(StopError::NotRunning);
        };
        process.stop_requested = true;
        let pid = process.info.pid;
        let generation = process.info.generation;

        tracing::info!("Stopping server '{}' (PID {})", process.info.server, pid);
        if let Err(e) = launch::request_terminate(pid) {
            tracing::warn!("Terminate request for PID {} failed: {}, killing instead", pid, e);
            if let Some(kill_tx) = process.kill_tx.take() {
                let _ = kill_tx.send(());
            }
        }
        drop(inner);
        self.sink.append(LogSource::System, "Stopping server...\n");

        let supervisor = self.clone();
        let grace = self.launch.stop_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            supervisor.force_kill(generation, grace).await;
        });
        Ok(())
    }

    async fn force_kill(&self, generation: u64, waited: Duration) {
        let mut inner = self.inner.lock().await;
        let Some(process) = inner
            .process
            .as_mut()
            .filter(|p| p.info.generation == generation)
        else {
            return;
        };
        let pid = process.info.pid;
        tracing::warn!(
            "Server '{}' still running {:?} after stop request, killing PID {}",
            process.info.server,
            waited,
            pid
        );

        // The reaper may be gone already if the server process exited and a
        // child of it keeps the output open; the group kill covers that case.
        let reaper_notified = process.kill_tx.take().is_some_and(|tx| tx.send(()).is_ok());
        let group_killed = launch::kill_group(pid);
        drop(inner);

        self.sink.append(
            LogSource::System,
            &format!("Server did not stop within {:?}, killing it.\n", waited),
        );
        if let Err(e) = group_killed {
            if !reaper_notified {
                tracing::error!("Failed to kill server process group {}: {}", pid, e);
                self.sink.append(
                    LogSource::System,
                    &format!("Failed to kill server process {}: {}\n", pid, e),
                );
            }
        }
    }

    /// Write one command line to the server's stdin.
    ///
    /// Trailing line endings are dropped. A CR or LF anywhere else would make
    /// the server read several commands, so such text is rejected.
    pub async fn write_line(&self, text: &str) -> Result<(), WriteError> {
        let text = text.trim_end_matches(['\r', '\n']);
        if text.contains(['\r', '\n']) {
            return Err(WriteError::InvalidCommand);
        }

        let mut inner = self.inner.lock().await;
        if inner.machine.state() != State::Running {
            return Err(WriteError::NotRunning);
        }
        let process = inner.process.as_mut().ok_or(WriteError::NotRunning)?;

        let mut line = text.to_string();
        line.push('\n');

        let write = async {
            process.stdin.write_all(line.as_bytes()).await?;
            process.stdin.flush().await
        };
        match tokio::time::timeout(WRITE_TIMEOUT, write).await {
            Ok(result) => result.map_err(WriteError::Io),
            Err(_) => Err(WriteError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "server is not reading its input",
            ))),
        }
    }

    /// Completion callback for the relay of `generation`.
    async fn on_output_closed(&self, generation: u64, summary: Option<RelaySummary>) {
        let mut inner = self.inner.lock().await;
        let is_current = inner
            .process
            .as_ref()
            .is_some_and(|p| p.info.generation == generation);
        if !is_current {
            tracing::debug!("Ignoring output close for stale generation {}", generation);
            return;
        }
        let Some(process) = inner.process.take() else {
            return;
        };

        let lines = match &summary {
            Some(summary) => summary.lines,
            None => {
                tracing::warn!("Output relay for generation {} ended without a summary", generation);
                0
            }
        };
        let crashed = !process.stop_requested;
        if crashed {
            self.set_state(&mut inner, State::Crashed);
        }
        self.set_state(&mut inner, State::Idle);

        inner.exits += 1;
        inner.last_exit = Some(ExitReport {
            server: process.info.server.clone(),
            generation,
            crashed,
            lines,
        });
        drop(inner);

        if crashed {
            tracing::warn!("Server '{}' exited unexpectedly", process.info.server);
            self.sink.append(
                LogSource::System,
                &format!("Server '{}' exited unexpectedly.\n", process.info.server),
            );
        } else {
            tracing::info!("Server '{}' stopped", process.info.server);
            self.sink.append(LogSource::System, "Server stopped.\n");
        }
    }

    pub async fn state(&self) -> State {
        self.inner.lock().await.machine.state()
    }

    /// Follow state changes without taking the supervisor lock.
    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.state_tx.subscribe()
    }

    pub async fn info(&self) -> Option<ProcessInfo> {
        self.inner.lock().await.process.as_ref().map(|p| p.info.clone())
    }

    pub async fn last_exit(&self) -> Option<ExitReport> {
        self.inner.lock().await.last_exit.clone()
    }

    /// Number of process generations that have ended.
    pub async fn exit_count(&self) -> u64 {
        self.inner.lock().await.exits
    }
}

#[async_trait]
impl LocalTarget for ProcessSupervisor {
    async fn write_line(&self, text: &str) -> Result<(), WriteError> {
        ProcessSupervisor::write_line(self, text).await
    }

    async fn stop(&self) -> Result<(), StopError> {
        ProcessSupervisor::stop(self).await
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
