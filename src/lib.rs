pub mod cli;
pub mod config;
pub mod console;
pub mod ipc;
pub mod manager;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod supervisor;
