//! Supervisor error types. Each operation gets its own enum so callers can
//! match on exactly the failures that operation can produce.

use std::io;

#[derive(thiserror::Error, Debug)]
pub enum StartError {
    #[error("A server is already running")]
    AlreadyRunning,

    #[error("Failed to start server: {0}")]
    SpawnFailed(#[source] io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum StopError {
    #[error("No server running")]
    NotRunning,
}

#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    #[error("No local server running")]
    NotRunning,

    #[error("Command must be a single line")]
    InvalidCommand,

    #[error("Failed to write to server stdin: {0}")]
    Io(#[from] io::Error),
}
