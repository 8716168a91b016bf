//! # stackrun_runner
//!
//! Wrapped-tool execution for stackrun.
//!
//! This crate runs the infrastructure tool in a module's working directory
//! and reports exit code and captured output. It knows nothing about stacks
//! or dependency graphs.
//!
//! # Features
//!
//! - **Runners**: process-backed [`CliToolRunner`] and [`MockToolRunner`]
//! - **Retry**: re-invocation on known transient error signatures
//! - **Command policy**: disabled run-all commands, legacy command names,
//!   confirmation requirements, run-all argument rewriting
//!
//! # Example
//!
//! ```rust,no_run
//! use stackrun_runner::{CliToolRunner, CliRunnerOptions, RunConfig, ToolInvocation, ToolRunner};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = CliToolRunner::new(CliRunnerOptions::default());
//!     let invocation = ToolInvocation::new("terraform", "./live/vpc").arg("plan");
//!
//!     let output = runner.run(&invocation, &RunConfig::default()).await?;
//!     println!("Exit code: {}", output.exit_code);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod mock;
pub mod retry;
pub mod runner;

pub use cli::{CliRunnerOptions, CliToolRunner};
pub use commands::{
    ensure_run_all_allowed, requires_confirmation, resolve_command, run_all_args,
    runs_in_reverse, CommandRewrite, LegacyCommand,
};
pub use config::{RunConfig, ToolInvocation, DEFAULT_TOOL};
pub use error::{RunnerError, RunnerResult};
pub use mock::{CapturedCall, MockResponse, MockToolRunner};
pub use retry::{run_with_retry, RetriedOutput, RetryPolicy, RetrySettings};
pub use runner::{ToolOutput, ToolRunner};
