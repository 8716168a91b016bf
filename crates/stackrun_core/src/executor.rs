//! Module executors: what the scheduler does with a module once it is ready.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use stackrun_runner::{run_with_retry, RetryPolicy, RunConfig, ToolInvocation, ToolRunner};

use crate::error::CoreResult;
use crate::module::Module;

/// Result of executing one module.
#[derive(Debug, Clone, Default)]
pub struct ModuleRun {
    pub exit_code: i64,
    pub output: String,
    /// Short description of the failure, if any
    pub summary: String,
    pub attempts: u32,
}

impl ModuleRun {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            output: output.into(),
            summary: String::new(),
            attempts: 1,
        }
    }

    pub fn failure(exit_code: i64, summary: impl Into<String>) -> Self {
        let summary = summary.into();
        Self {
            exit_code,
            output: summary.clone(),
            summary,
            attempts: 1,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs the work for one module.
///
/// An `Err` and a non-zero exit code both mark the module failed.
#[async_trait]
pub trait ModuleExecutor: Send + Sync {
    async fn execute(&self, module: &Module) -> CoreResult<ModuleRun>;
}

/// Executes the wrapped tool in each module's directory.
pub struct ToolModuleExecutor {
    runner: Arc<dyn ToolRunner>,
    invocation: ToolInvocation,
    run_config: RunConfig,
    retry: RetryPolicy,
}

impl ToolModuleExecutor {
    /// `invocation` is a template; its working directory is replaced by
    /// each module's path.
    pub fn new(runner: Arc<dyn ToolRunner>, invocation: ToolInvocation) -> Self {
        Self {
            runner,
            invocation,
            run_config: RunConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_run_config(mut self, run_config: RunConfig) -> Self {
        self.run_config = run_config;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn invocation(&self) -> &ToolInvocation {
        &self.invocation
    }
}

#[async_trait]
impl ModuleExecutor for ToolModuleExecutor {
    async fn execute(&self, module: &Module) -> CoreResult<ModuleRun> {
        let invocation = self.invocation.in_dir(&module.path);
        let run_config = RunConfig {
            log_prefix: Some(module.path.display().to_string()),
            ..self.run_config.clone()
        };

        debug!("Running '{}' in {:?}", invocation.command_line(), module.path);
        let result =
            run_with_retry(self.runner.as_ref(), &invocation, &run_config, &self.retry).await?;

        let summary = if result.output.success() {
            String::new()
        } else {
            format!("exit code {}: {}", result.output.exit_code, result.output.summary())
        };

        Ok(ModuleRun {
            exit_code: result.output.exit_code,
            output: result.output.combined_output(),
            summary,
            attempts: result.attempts,
        })
    }
}
