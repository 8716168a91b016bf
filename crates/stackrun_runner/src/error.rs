//! Error types for the runner module.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors that can occur during runner operations.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Tool not available: {0}")]
    ToolNotAvailable(String),

    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Tool timeout after {0} seconds")]
    Timeout(u64),

    #[error("Exhausted {attempts} attempts running '{command}' in {}", working_dir.display())]
    MaxRetriesExceeded {
        command: String,
        working_dir: PathBuf,
        attempts: u32,
        /// Combined output of the last attempt
        output: String,
    },

    #[error("Command '{command}' is not supported under run-all: {reason}")]
    DisabledCommand { command: String, reason: String },

    #[error("Invalid retry pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
