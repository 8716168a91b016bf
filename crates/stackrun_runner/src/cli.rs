//! Process-backed tool runner.
//!
//! Spawns the wrapped tool as a child process, collects stdout and stderr
//! line by line, and optionally streams the lines through the log with a
//! module prefix.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::config::{RunConfig, ToolInvocation};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{ToolOutput, ToolRunner};

/// Options for the process-backed runner.
#[derive(Debug, Clone, Default)]
pub struct CliRunnerOptions {
    /// Dry-run mode (log commands without executing)
    pub dry_run: bool,
}

impl CliRunnerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// Runs the wrapped tool as a local child process.
#[derive(Debug, Clone, Default)]
pub struct CliToolRunner {
    options: CliRunnerOptions,
}

impl CliToolRunner {
    pub fn new(options: CliRunnerOptions) -> Self {
        Self { options }
    }

    /// Check if dry-run mode is enabled.
    pub fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }

    fn build_command(invocation: &ToolInvocation) -> Command {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

async fn collect_lines<R>(reader: R, stream: bool, prefix: Option<String>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut output = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        if stream {
            info!(target: "stackrun::tool", "[{}] {}", prefix.as_deref().unwrap_or(""), line);
        }
        output.push_str(&line);
        output.push('\n');
    }
    output
}

#[async_trait]
impl ToolRunner for CliToolRunner {
    async fn is_available(&self, program: &str) -> RunnerResult<bool> {
        let status = Command::new(program)
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        Ok(status.map(|s| s.success()).unwrap_or(false))
    }

    async fn run(
        &self,
        invocation: &ToolInvocation,
        run_config: &RunConfig,
    ) -> RunnerResult<ToolOutput> {
        let cmd_str = invocation.command_line();
        debug!("Executing: {} in {:?}", cmd_str, invocation.working_dir);

        if self.options.dry_run {
            info!("[DRY-RUN] Would execute: {} in {:?}", cmd_str, invocation.working_dir);
            let now = Utc::now();
            return Ok(ToolOutput {
                exit_code: 0,
                stdout: format!("[DRY-RUN] Command: {}", cmd_str),
                stderr: String::new(),
                started_at: now,
                finished_at: now,
                duration_ms: 0,
            });
        }

        let started_at = Utc::now();
        let mut child = Self::build_command(invocation).spawn().map_err(|e| {
            RunnerError::ExecutionFailed(format!("Failed to spawn {}: {}", invocation.program, e))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::ExecutionFailed("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunnerError::ExecutionFailed("stderr not captured".to_string()))?;

        let stdout_task = tokio::spawn(collect_lines(
            stdout,
            run_config.stream_logs,
            run_config.log_prefix.clone(),
        ));
        let stderr_task = tokio::spawn(collect_lines(
            stderr,
            run_config.stream_logs,
            run_config.log_prefix.clone(),
        ));

        let status = if run_config.timeout_seconds > 0 {
            let limit = Duration::from_secs(run_config.timeout_seconds);
            match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(RunnerError::Timeout(run_config.timeout_seconds));
                }
            }
        } else {
            child.wait().await?
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        let exit_code = status.code().unwrap_or(-1) as i64;

        if exit_code == 0 {
            debug!("{} completed in {}ms", cmd_str, duration_ms);
        } else {
            error!(
                "{} failed with exit code {} after {}ms",
                cmd_str, exit_code, duration_ms
            );
        }

        Ok(ToolOutput {
            exit_code,
            stdout,
            stderr,
            started_at,
            finished_at,
            duration_ms,
        })
    }
}
