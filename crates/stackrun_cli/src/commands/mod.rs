//! CLI command definitions.
//!
//! Each subcommand lives in its own module with an `Args` struct and an
//! `execute` function.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use stackrun_core::{RunAllConfig, Stack};

use crate::discovery::discover_modules;

pub mod graph;
pub mod provider_cache;
pub mod run_all;

/// stackrun - run an infrastructure tool across a stack of modules
#[derive(Parser)]
#[command(name = "stackrun")]
#[command(version, about = "Run an infrastructure tool across a stack of modules")]
#[command(long_about = r#"
stackrun discovers modules (directories holding a stackrun.yaml file), builds
their dependency graph and runs the wrapped infrastructure tool in every module,
in parallel where the graph allows it.

COMMANDS:
  run-all             → Run a tool command in every module
  graph-dependencies  → Print the dependency graph in DOT format
  provider-cache      → Run the provider plugin cache server

EXIT CODES:
  0   - Success
  1   - General error
  2   - Invalid arguments or configuration
  3   - One or more modules failed
  130 - Cancelled
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a tool command in every module of the stack
    #[command(name = "run-all")]
    RunAll(run_all::RunAllArgs),

    /// Print the stack's dependency graph
    #[command(name = "graph-dependencies")]
    GraphDependencies(graph::GraphArgs),

    /// Provider plugin cache server
    #[command(name = "provider-cache", subcommand)]
    ProviderCache(provider_cache::ProviderCacheCommand),
}

/// Options selecting and shaping the stack, shared by stack commands.
#[derive(Args, Debug, Clone, Default)]
pub struct StackArgs {
    /// Root directory to discover modules under
    #[arg(long, env = "STACKRUN_WORKING_DIR")]
    pub working_dir: Option<PathBuf>,

    /// Run-all configuration file (YAML)
    #[arg(long, env = "STACKRUN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Only include modules under these globs (and their dependencies)
    #[arg(long = "include-dir", env = "STACKRUN_INCLUDE_DIR", value_delimiter = ',')]
    pub include_dirs: Vec<String>,

    /// Exclude modules under these globs
    #[arg(long = "exclude-dir", env = "STACKRUN_EXCLUDE_DIR", value_delimiter = ',')]
    pub exclude_dirs: Vec<String>,

    /// Do not pull in dependencies of included modules
    #[arg(long, env = "STACKRUN_STRICT_INCLUDE")]
    pub strict_include: bool,

    /// Drop dependencies on paths outside the discovered stack
    #[arg(long, env = "STACKRUN_IGNORE_EXTERNAL_DEPENDENCIES")]
    pub ignore_external_dependencies: bool,

    /// Treat dependencies outside the stack as already applied
    #[arg(
        long,
        env = "STACKRUN_INCLUDE_EXTERNAL_DEPENDENCIES",
        conflicts_with = "ignore_external_dependencies"
    )]
    pub include_external_dependencies: bool,
}

impl StackArgs {
    /// File configuration with these flags applied on top.
    pub fn load_config(&self) -> Result<RunAllConfig> {
        let mut config = match &self.config {
            Some(path) => RunAllConfig::load(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()))?,
            None => RunAllConfig::default(),
        };
        self.apply(&mut config);
        Ok(config)
    }

    pub fn apply(&self, config: &mut RunAllConfig) {
        config.include_dirs.extend(self.include_dirs.iter().cloned());
        config.exclude_dirs.extend(self.exclude_dirs.iter().cloned());
        config.strict_include |= self.strict_include;
        config.ignore_external_dependencies |= self.ignore_external_dependencies;
        config.include_external_dependencies |= self.include_external_dependencies;
    }

    pub fn working_dir(&self) -> Result<PathBuf> {
        let dir = match &self.working_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("Failed to read current directory")?,
        };
        dir.canonicalize()
            .with_context(|| format!("Working directory not found: {}", dir.display()))
    }
}

/// Discover, build and filter the stack under `working_dir`.
pub fn load_stack(working_dir: &std::path::Path, config: &RunAllConfig) -> Result<Stack> {
    let modules = discover_modules(working_dir)?;
    let mut stack = Stack::build(modules, config.stack_options(working_dir))?;
    stack.filter(&config.filter_options())?;
    Ok(stack)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_all() {
        let cli = Cli::try_parse_from([
            "stackrun",
            "-v",
            "run-all",
            "--parallelism",
            "4",
            "--exclude-dir",
            "legacy,old",
            "plan",
            "--",
            "-lock=false",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::RunAll(args) => {
                assert_eq!(args.parallelism, Some(4));
                assert_eq!(args.stack.exclude_dirs, vec!["legacy", "old"]);
                assert_eq!(args.command.as_deref(), Some("plan"));
                assert_eq!(args.args, vec!["-lock=false"]);
            }
            _ => panic!("expected run-all"),
        }
    }

    #[test]
    fn test_flags_extend_file_config() {
        let mut config = RunAllConfig {
            exclude_dirs: vec!["a".to_string()],
            ..Default::default()
        };
        let args = StackArgs {
            exclude_dirs: vec!["b".to_string()],
            strict_include: true,
            ..Default::default()
        };
        args.apply(&mut config);
        assert_eq!(config.exclude_dirs, vec!["a", "b"]);
        assert!(config.strict_include);
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["stackrun", "-v", "-q", "graph-dependencies"]).is_err());
    }
}
