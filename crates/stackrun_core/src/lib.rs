//! # stackrun_core
//!
//! Stack graph and parallel run-all scheduler for stackrun.
//!
//! A stack is a set of modules, each a directory the wrapped tool runs in,
//! linked by dependency edges. This crate builds and validates the stack,
//! applies include/exclude filters, renders the dependency graph and runs an
//! executor over every module with bounded parallelism.
//!
//! # Architecture
//!
//! - **Stack**: validated module graph with filtering and traversal helpers
//! - **Scheduler**: dispatches modules as soon as their dependencies finish
//! - **Executor**: what happens in a module; [`ToolModuleExecutor`] runs the
//!   wrapped tool through a [`stackrun_runner::ToolRunner`]
//! - **Report**: per-module outcomes, folded into one error on failure
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stackrun_core::{Module, RunOptions, Scheduler, Stack, StackOptions, ToolModuleExecutor};
//! use stackrun_runner::{CliRunnerOptions, CliToolRunner, ToolInvocation};
//! use tokio_util::sync::CancellationToken;
//!
//! let stack = Stack::build(
//!     vec![Module::new("/live/vpc"), Module::new("/live/app").depends_on("../vpc")],
//!     StackOptions::default(),
//! )?;
//!
//! let runner = Arc::new(CliToolRunner::new(CliRunnerOptions::default()));
//! let executor = ToolModuleExecutor::new(runner, ToolInvocation::new("terraform", ".").arg("plan"));
//! let scheduler = Scheduler::new(Arc::new(executor), RunOptions::default().parallelism(4));
//!
//! let report = scheduler.run(&stack, CancellationToken::new()).await?.into_result()?;
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod module;
pub mod report;
pub mod scheduler;
pub mod stack;

pub use config::{
    FilterOptions, ProviderCacheSettings, RunAllConfig, RunOptions, StackOptions,
    DEFAULT_PARALLELISM,
};
pub use error::{CoreError, CoreResult, ModuleError, MultiError};
pub use executor::{ModuleExecutor, ModuleRun, ToolModuleExecutor};
pub use graph::{parse_dot_edges, Edge};
pub use module::{normalize_path, resolve_dependency, Module, ModuleStatus};
pub use report::{ModuleOutcome, RunReport, SkipReason};
pub use scheduler::{Scheduler, StatusEvent};
pub use stack::Stack;
