//! Interactive console on the daemon's stdin.
//!
//! Lines starting with `:` are operator commands; anything else is sent to
//! the server through the router, exactly as typed.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::console::{LogSource, Sink};
use crate::manager::Manager;
use crate::router::DEFAULT_RCON_PORT;

const HELP: &str = "\
Commands:
  :list                          list server folders
  :refresh                       rescan the servers directory
  :start <name>                  start a server
  :stop                          stop the server
  :status                        show process and RCON state
  :rcon <host> [port] [password] route commands over RCON
  :rcon off                      route commands to the local server
  :help                          this text
Any other line is sent to the server.
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Command(String),
    List,
    Refresh,
    Start(String),
    Stop,
    Status,
    Rcon {
        host: String,
        port: u16,
        password: String,
    },
    RconOff,
    Help,
    /// Malformed `:` command, with the reason
    Invalid(String),
}

pub fn parse(line: &str) -> ConsoleInput {
    let trimmed = line.trim();
    let Some(rest) = trimmed.strip_prefix(':') else {
        return ConsoleInput::Command(line.trim_end_matches(['\r', '\n']).to_string());
    };

    let (keyword, tail) = split_token(rest);
    let keyword = keyword.to_ascii_lowercase();
    if keyword == "rcon" {
        return parse_rcon(tail);
    }
    let args: Vec<&str> = tail.split_whitespace().collect();

    match (keyword.as_str(), args.as_slice()) {
        ("list", []) => ConsoleInput::List,
        ("refresh", []) => ConsoleInput::Refresh,
        ("start", [name]) => ConsoleInput::Start(name.to_string()),
        ("start", _) => ConsoleInput::Invalid("usage: :start <name>".to_string()),
        ("stop", []) => ConsoleInput::Stop,
        ("status", []) => ConsoleInput::Status,
        ("help", _) => ConsoleInput::Help,
        (other, _) => ConsoleInput::Invalid(format!("unknown command :{}", other)),
    }
}

/// `:rcon <host> [port] [password]`; the password is the rest of the line.
fn parse_rcon(args: &str) -> ConsoleInput {
    let (host, tail) = split_token(args);
    if host.is_empty() {
        return ConsoleInput::Invalid("usage: :rcon <host> [port] [password] | :rcon off".to_string());
    }
    if tail.is_empty() && host.eq_ignore_ascii_case("off") {
        return ConsoleInput::RconOff;
    }

    let (port, password) = split_token(tail);
    let port = if port.is_empty() {
        DEFAULT_RCON_PORT
    } else {
        match port.parse::<u16>() {
            Ok(p) if p != 0 => p,
            _ => return ConsoleInput::Invalid(format!("invalid port: {}", port)),
        }
    };
    ConsoleInput::Rcon {
        host: host.to_string(),
        port,
        password: password.to_string(),
    }
}

/// First whitespace-separated token and the remainder, leading space trimmed.
fn split_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

/// Execute one parsed line. Results land in the console like everything else.
pub async fn execute(manager: &Manager, input: ConsoleInput) {
    let console = manager.console();
    match input {
        ConsoleInput::Command(text) => {
            manager.send_command(&text).await;
        }
        ConsoleInput::List => {
            let servers = manager.list_servers();
            if servers.is_empty() {
                console.append(LogSource::System, "No servers found.\n");
            }
            for server in servers {
                console.append(
                    LogSource::System,
                    &format!("  {}  ({})\n", server.name, server.artifact_path.display()),
                );
            }
        }
        ConsoleInput::Refresh => {
            if let Ok(servers) = manager.refresh_registry() {
                console.append(LogSource::System, &format!("Found {} server(s).\n", servers.len()));
            }
        }
        ConsoleInput::Start(name) => {
            // 실패는 manager가 콘솔에 기록함
            let _ = manager.start_server(&name).await;
        }
        ConsoleInput::Stop => {
            manager.stop_server().await;
        }
        ConsoleInput::Status => {
            let status = manager.status().await;
            let mut text = format!("State: {:?}\n", status.state);
            if let Some(process) = &status.process {
                text.push_str(&format!("Server: {} (PID {})\n", process.server, process.pid));
            }
            if status.remote.active {
                text.push_str(&format!("RCON: {}:{}\n", status.remote.host, status.remote.port));
            } else {
                text.push_str("RCON: off\n");
            }
            console.append(LogSource::System, &text);
        }
        ConsoleInput::Rcon { host, port, password } => {
            let _ = manager.configure_remote(&host, port, &password, true);
        }
        ConsoleInput::RconOff => {
            let remote = manager.status().await.remote;
            let _ = manager.configure_remote(&remote.host, remote.port, "", false);
        }
        ConsoleInput::Help => console.append(LogSource::System, HELP),
        ConsoleInput::Invalid(reason) => {
            console.append(LogSource::System, &format!("{}\n", reason));
        }
    }
}

/// Read stdin until EOF.
pub async fn run(manager: Arc<Manager>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        execute(&manager, parse(&line)).await;
    }
    tracing::debug!("stdin closed, interactive console finished");
    Ok(())
}
