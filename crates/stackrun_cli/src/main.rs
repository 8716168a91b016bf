//! stackrun CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments or configuration
//! - 3: One or more modules failed
//! - 130: Cancelled

use std::process::ExitCode;

use clap::Parser;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stackrun_core::CoreError;
use stackrun_runner::{LegacyCommand, RunnerError};

mod cache;
mod commands;
mod discovery;

use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_CONFIG: u8 = 2;
    pub const MODULE_FAILURE: u8 = 3;
    pub const CANCELLED: u8 = 130;
}

#[tokio::main]
async fn main() -> ExitCode {
    let (args, legacy) = rewrite_legacy_args(std::env::args().collect());
    let cli = Cli::parse_from(args);

    let default_filter = if cli.verbose {
        "stackrun=debug,warn"
    } else if cli.quiet {
        "warn"
    } else {
        "stackrun=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    // Ignore re-initialisation
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init();

    if let Some(legacy) = legacy {
        warn!(
            "'{}' is deprecated, use 'run-all {}' instead",
            legacy.name(),
            legacy.rewrite().command
        );
    }

    let result = match cli.command {
        Commands::RunAll(args) => commands::run_all::execute(args, cli.quiet).await,
        Commands::GraphDependencies(args) => commands::graph::execute(args).await,
        Commands::ProviderCache(command) => commands::provider_cache::execute(command).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Turn `stackrun plan-all ...` into `stackrun run-all plan ...`.
fn rewrite_legacy_args(mut args: Vec<String>) -> (Vec<String>, Option<LegacyCommand>) {
    let position = args
        .iter()
        .skip(1)
        .position(|a| !a.starts_with('-'))
        .map(|p| p + 1);
    let legacy = position.and_then(|p| LegacyCommand::lookup(&args[p]).map(|l| (p, l)));
    match legacy {
        Some((position, legacy)) => {
            args.splice(position..=position, ["run-all".to_string(), legacy.rewrite().command]);
            (args, Some(legacy))
        }
        None => (args, None),
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    if let Some(core) = e.downcast_ref::<CoreError>() {
        return match core {
            CoreError::RunAll(_) => ExitCodes::MODULE_FAILURE,
            CoreError::Cancelled => ExitCodes::CANCELLED,
            CoreError::MissingDependency { .. }
            | CoreError::DependencyCycle(_)
            | CoreError::DuplicateModule(_)
            | CoreError::ModuleNotFound(_)
            | CoreError::InvalidPattern { .. }
            | CoreError::MissingCommand
            | CoreError::InvalidConfig(_)
            | CoreError::Serialization(_) => ExitCodes::INVALID_CONFIG,
            CoreError::Runner(RunnerError::DisabledCommand { .. }) => ExitCodes::INVALID_CONFIG,
            _ => ExitCodes::GENERAL_ERROR,
        };
    }
    match e.downcast_ref::<RunnerError>() {
        Some(RunnerError::DisabledCommand { .. } | RunnerError::InvalidPattern(_)) => {
            ExitCodes::INVALID_CONFIG
        }
        _ => ExitCodes::GENERAL_ERROR,
    }
}
