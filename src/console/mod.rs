//! Console sink - the single place operator-visible output ends up.
//!
//! Every component reports here: raw process output from the relay, status
//! messages from the supervisor and router, and RCON responses.
//! - Ring buffer with sequential IDs for polling (`GET /api/console?since=<id>`).
//!   IDs start at 1, so `since=0` returns everything still buffered.
//! - Broadcast channel for live followers (the interactive terminal)

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default maximum number of lines kept in the ring buffer.
/// Can be overridden via `log_buffer_size` in config/mineswap.toml.
pub const DEFAULT_LOG_BUFFER: usize = 10_000;

/// Minecraft prints `[12:00:00] [Server thread/WARN]: ...`
const MINECRAFT_LEVEL_PATTERN: &str = r"/(?P<level>INFO|WARN|WARNING|ERROR|DEBUG|TRACE|FATAL)\]";

/// Append-only destination for human-readable lines.
pub trait Sink: Send + Sync {
    fn append(&self, source: LogSource, text: &str);
}

// ─── Log Types ───────────────────────────────────────────────

/// A single line of console output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    /// Sequential ID for polling
    pub id: u64,
    /// Unix timestamp (seconds)
    pub timestamp: u64,
    pub source: LogSource,
    /// Verbatim text, including the trailing newline for process output
    pub content: String,
    pub level: LogLevel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    /// Merged stdout/stderr of the child server
    Process,
    /// Status messages from mineswap itself
    System,
    /// Responses and errors from remote sessions
    Rcon,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

// ─── Log Buffer ──────────────────────────────────────────────

struct LogBuffer {
    lines: VecDeque<LogLine>,
    next_id: u64,
    max_size: usize,
}

impl LogBuffer {
    fn with_capacity(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            lines: VecDeque::with_capacity(max_size.min(DEFAULT_LOG_BUFFER)),
            next_id: 1,
            max_size,
        }
    }

    fn push(&mut self, source: LogSource, content: String, level: LogLevel) -> LogLine {
        let line = LogLine {
            id: self.next_id,
            timestamp: current_timestamp(),
            source,
            content,
            level,
        };
        self.next_id += 1;

        if self.lines.len() >= self.max_size {
            self.lines.pop_front();
        }
        self.lines.push_back(line.clone());
        line
    }

    /// All lines with id > `since_id`.
    fn get_since(&self, since_id: u64) -> Vec<LogLine> {
        self.lines.iter().filter(|l| l.id > since_id).cloned().collect()
    }

    fn get_recent(&self, count: usize) -> Vec<LogLine> {
        self.lines.iter().rev().take(count).rev().cloned().collect()
    }
}

// ─── Console ─────────────────────────────────────────────────

pub struct Console {
    buffer: Mutex<LogBuffer>,
    broadcast: broadcast::Sender<LogLine>,
    level_pattern: Option<Regex>,
}

impl Console {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOG_BUFFER)
    }

    pub fn with_capacity(max_size: usize) -> Self {
        let (broadcast, _) = broadcast::channel(2048);
        let level_pattern = match Regex::new(MINECRAFT_LEVEL_PATTERN) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!("Invalid level pattern: {}, all lines default to info", e);
                None
            }
        };
        Self {
            buffer: Mutex::new(LogBuffer::with_capacity(max_size)),
            broadcast,
            level_pattern,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogBuffer> {
        // A panic while holding the buffer lock leaves it consistent; keep going.
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lines with `id > since_id`.
    pub fn since(&self, since_id: u64) -> Vec<LogLine> {
        self.lock().get_since(since_id)
    }

    /// The most recent `count` lines.
    pub fn recent(&self, count: usize) -> Vec<LogLine> {
        self.lock().get_recent(count)
    }

    /// Subscribe to lines appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LogLine> {
        self.broadcast.subscribe()
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for Console {
    fn append(&self, source: LogSource, text: &str) {
        let level = match source {
            LogSource::Process => parse_log_level(text, self.level_pattern.as_ref()),
            LogSource::System | LogSource::Rcon => LogLevel::Info,
        };
        // Sent under the buffer lock so followers see lines in id order
        let mut buffer = self.lock();
        let line = buffer.push(source, text.to_string(), level);
        // No followers is fine
        let _ = self.broadcast.send(line);
    }
}

// ─── Helpers ─────────────────────────────────────────────────

/// Parse the level out of a server log line. Lines without a recognizable
/// marker are Info.
fn parse_log_level(line: &str, pattern: Option<&Regex>) -> LogLevel {
    let Some(re) = pattern else {
        return LogLevel::Info;
    };
    match re.captures(line).and_then(|caps| caps.name("level")) {
        Some(level) => match level.as_str() {
            "ERROR" | "FATAL" => LogLevel::Error,
            "WARN" | "WARNING" => LogLevel::Warn,
            "DEBUG" | "TRACE" => LogLevel::Debug,
            _ => LogLevel::Info,
        },
        None => LogLevel::Info,
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_append_and_query() {
        let console = Console::new();
        console.append(LogSource::Process, "line 0\n");
        console.append(LogSource::Process, "line 1\n");
        console.append(LogSource::System, "Server stopped.\n");

        assert_eq!(console.recent(100).len(), 3);
        // ids start at 1, so since 0 is everything
        assert_eq!(console.since(0).len(), 3);
        assert_eq!(console.since(1).len(), 2);
        assert_eq!(console.recent(1)[0].content, "Server stopped.\n");
    }

    #[test]
    fn test_console_ring() {
        let console = Console::with_capacity(10);
        for i in 0..25 {
            console.append(LogSource::Process, &format!("line {}\n", i));
        }
        let lines = console.recent(100);
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[0].id, 16);
        assert_eq!(lines[9].content, "line 24\n");
    }

    #[test]
    fn test_process_lines_keep_verbatim_content() {
        let console = Console::new();
        console.append(LogSource::Process, "  spaced\r\n");
        assert_eq!(console.recent(1)[0].content, "  spaced\r\n");
    }

    #[test]
    fn test_level_parsing() {
        let console = Console::new();
        console.append(LogSource::Process, "[12:00:00] [Server thread/INFO]: Done (5.123s)!\n");
        console.append(LogSource::Process, "[12:00:00] [Server thread/WARN]: Can't keep up!\n");
        console.append(LogSource::Process, "[12:00:00] [Server thread/ERROR]: Encountered an unexpected exception\n");
        console.append(LogSource::Process, "plain output\n");
        // System lines are never parsed
        console.append(LogSource::System, "[x/ERROR] not from the server\n");

        let levels: Vec<LogLevel> = console.recent(5).iter().map(|l| l.level).collect();
        assert_eq!(
            levels,
            vec![LogLevel::Info, LogLevel::Warn, LogLevel::Error, LogLevel::Info, LogLevel::Info]
        );
    }

    #[tokio::test]
    async fn test_subscribe_receives_new_lines() {
        let console = Console::new();
        let mut rx = console.subscribe();
        console.append(LogSource::Rcon, "[RCON] ok\n");
        let line = rx.recv().await.unwrap();
        assert_eq!(line.source, LogSource::Rcon);
        assert_eq!(line.content, "[RCON] ok\n");
    }

    #[test]
    fn test_followers_see_id_order() {
        let console = std::sync::Arc::new(Console::new());
        let mut rx = console.subscribe();

        let writers: Vec<_> = (0..4)
            .map(|n| {
                let console = console.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let source = if n % 2 == 0 { LogSource::Process } else { LogSource::System };
                        console.append(source, &format!("{} {}\n", n, i));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let mut ids = Vec::new();
        while let Ok(line) = rx.try_recv() {
            ids.push(line.id);
        }
        assert_eq!(ids.len(), 800);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }
}
