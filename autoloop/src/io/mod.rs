//! I/O adapters for the agent loop.

pub mod config;
pub mod console;
pub mod cycle_log;
pub mod gateway;
pub mod init;
pub mod model_process;
pub mod process;
pub mod profile;
pub mod prompt;
