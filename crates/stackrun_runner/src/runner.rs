//! Tool runner trait and types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{RunConfig, ToolInvocation};
use crate::error::RunnerResult;

/// Result of one wrapped-tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Exit code from the process
    pub exit_code: i64,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Execution start time
    pub started_at: DateTime<Utc>,
    /// Execution end time
    pub finished_at: DateTime<Utc>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl ToolOutput {
    /// Check if execution was successful (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get combined output (stdout + stderr).
    pub fn combined_output(&self) -> String {
        if self.stdout.is_empty() {
            self.stderr.clone()
        } else if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Last non-empty stderr line, or the last stdout line.
    pub fn summary(&self) -> String {
        self.stderr
            .lines()
            .rev()
            .chain(self.stdout.lines().rev())
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("no output")
            .to_string()
    }
}

/// Runs the wrapped infrastructure tool.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Check if the tool binary can be executed.
    async fn is_available(&self, program: &str) -> RunnerResult<bool>;

    /// Run the invocation to completion and capture its output.
    ///
    /// A non-zero exit code is reported through [`ToolOutput::exit_code`],
    /// not as an error.
    async fn run(
        &self,
        invocation: &ToolInvocation,
        run_config: &RunConfig,
    ) -> RunnerResult<ToolOutput>;
}
