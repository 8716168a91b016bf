//! Error types for the core module.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur during core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Module {} depends on {}, which is not part of the stack", module.display(), dependency.display())]
    MissingDependency {
        module: PathBuf,
        dependency: PathBuf,
    },

    #[error("Dependency cycle detected: {}", format_cycle(.0))]
    DependencyCycle(Vec<PathBuf>),

    #[error("Module declared twice: {}", .0.display())]
    DuplicateModule(PathBuf),

    #[error("Module not found: {}", .0.display())]
    ModuleNotFound(PathBuf),

    #[error("Invalid filter pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Missing command: run-all needs a command to run in each module")]
    MissingCommand,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    RunAll(MultiError),

    #[error("Run cancelled before all modules were dispatched")]
    Cancelled,

    #[error("Runner error: {0}")]
    Runner(#[from] stackrun_runner::RunnerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_yaml::Error> for CoreError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

fn format_cycle(cycle: &[PathBuf]) -> String {
    cycle
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Error recorded for one module of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleError {
    pub path: PathBuf,
    pub message: String,
}

/// Every module error of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiError {
    pub errors: Vec<ModuleError>,
}

impl MultiError {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn paths(&self) -> Vec<&PathBuf> {
        self.errors.iter().map(|e| &e.path).collect()
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} module(s) did not complete:", self.errors.len())?;
        for e in &self.errors {
            write!(f, "\n  - {}: {}", e.path.display(), e.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}
