//! Process launch and termination helpers.
//!
//! The supervisor decides *when* to start or stop; this module knows *how*:
//! the command line, the merged output pipe, and the signals.

use std::ffi::OsString;
use std::io::{self, PipeReader};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;

use crate::registry::ServerDefinition;

/// How long a released child may keep running after its output closed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Command line used to launch a server artifact.
///
/// The default shape is `java -Xmx1G -Xms1G -jar <artifact> nogui`.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Interpreter/runtime that runs the artifact (e.g., `"java"`)
    pub runtime: PathBuf,
    /// Arguments placed before the artifact (memory pair, jvm flags)
    pub runtime_args: Vec<String>,
    /// Flag introducing the artifact path (`-jar`), if the runtime needs one
    pub artifact_flag: Option<String>,
    /// Arguments placed after the artifact (`nogui`)
    pub server_args: Vec<String>,
    /// Grace period between the terminate request and a forced kill
    pub stop_timeout: Duration,
}

impl LaunchOptions {
    pub fn java(java: impl Into<PathBuf>, memory: &str) -> Self {
        Self {
            runtime: java.into(),
            runtime_args: vec![format!("-Xmx{}", memory), format!("-Xms{}", memory)],
            artifact_flag: Some("-jar".to_string()),
            server_args: vec!["nogui".to_string()],
            stop_timeout: Duration::from_secs(30),
        }
    }

    /// Full argument list for `definition`, runtime excluded.
    pub fn args_for(&self, artifact: impl Into<OsString>) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.runtime_args.iter().map(OsString::from).collect();
        if let Some(flag) = &self.artifact_flag {
            args.push(flag.into());
        }
        args.push(artifact.into());
        args.extend(self.server_args.iter().map(OsString::from));
        args
    }
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self::java("java", "1G")
    }
}

/// A freshly spawned child with its stdio split out.
pub(crate) struct Spawned {
    pub child: Child,
    pub pid: u32,
    pub stdin: ChildStdin,
    /// Read end of the pipe shared by the child's stdout and stderr
    pub output: PipeReader,
}

pub(crate) fn spawn_server(options: &LaunchOptions, definition: &ServerDefinition) -> io::Result<Spawned> {
    if !definition.artifact_path.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("artifact not found: {}", definition.artifact_path.display()),
        ));
    }
    let artifact = std::path::absolute(&definition.artifact_path)?;
    let working_dir = std::path::absolute(definition.working_dir())?;

    // stdout and stderr share one pipe so the relay sees a single ordered stream
    let (output, writer) = io::pipe()?;
    let stderr_writer = writer.try_clone()?;

    let mut cmd = Command::new(&options.runtime);
    cmd.args(options.args_for(artifact))
        .current_dir(&working_dir)
        .stdin(Stdio::piped())
        .stdout(writer)
        .stderr(stderr_writer)
        .kill_on_drop(false);

    // Own process group, so signals also reach whatever the artifact spawns
    #[cfg(unix)]
    cmd.process_group(0);

    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    let mut child = cmd.spawn().map_err(|e| {
        io::Error::new(e.kind(), format!("failed to run '{}': {}", options.runtime.display(), e))
    })?;
    // The command still holds our copies of the write ends; EOF never arrives
    // while they are open.
    drop(cmd);

    let pid = match child.id() {
        Some(pid) => pid,
        None => return Err(io::Error::other("child exited before its PID could be read")),
    };
    let stdin = match child.stdin.take() {
        Some(stdin) => stdin,
        None => {
            let _ = child.start_kill();
            return Err(io::Error::other("child stdin was not captured"));
        }
    };

    tracing::info!(
        "Spawned '{}' (PID {}) in {}",
        definition.artifact_path.display(),
        pid,
        working_dir.display()
    );
    Ok(Spawned { child, pid, stdin, output })
}

/// Signal every process in the server's group. The group id is the
/// server's PID because it was spawned as a group leader.
#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> io::Result<()> {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) => Ok(()),
        // group already empty
        Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(io::Error::from(e)),
    }
}

/// Ask the server to shut down. On unix this is SIGTERM to its process
/// group, which the Minecraft server handles as a clean stop.
#[cfg(unix)]
pub(crate) fn request_terminate(pid: u32) -> io::Result<()> {
    signal_group(pid, nix::sys::signal::Signal::SIGTERM)
}

/// Windows has no terminate request; the caller escalates to a kill.
#[cfg(not(unix))]
pub(crate) fn request_terminate(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "no graceful terminate on this platform"))
}

/// SIGKILL the whole process group, including children that outlived the
/// server process and still hold its output pipe.
#[cfg(unix)]
pub(crate) fn kill_group(pid: u32) -> io::Result<()> {
    signal_group(pid, nix::sys::signal::Signal::SIGKILL)
}

#[cfg(not(unix))]
pub(crate) fn kill_group(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "no process groups on this platform"))
}

/// Owns the child until it is reaped.
///
/// A message on `kill_rx` kills the child at once. If the sender is dropped
/// instead (the supervisor released the process after its output closed),
/// the child gets `EXIT_GRACE` to exit on its own before it is killed.
pub(crate) async fn reap(mut child: Child, mut kill_rx: oneshot::Receiver<()>, pid: u32) {
    let request = tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => tracing::info!("Process {} exited with {}", pid, status),
                Err(e) => tracing::warn!("Failed to wait for process {}: {}", pid, e),
            }
            return;
        }
        request = &mut kill_rx => request,
    };

    if request.is_err() {
        if let Ok(status) = tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            match status {
                Ok(status) => tracing::info!("Process {} exited with {}", pid, status),
                Err(e) => tracing::warn!("Failed to wait for process {}: {}", pid, e),
            }
            return;
        }
        tracing::warn!("Process {} outlived its output stream, killing it", pid);
    } else {
        tracing::warn!("Force-killing process {}", pid);
    }

    if let Err(e) = child.kill().await {
        tracing::error!("Failed to kill process {}: {}", pid, e);
    }
}
