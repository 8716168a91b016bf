//! Wrapped-tool command policy for run-all.
//!
//! Decides which subcommands may fan out across a stack, rewrites legacy
//! command names, and adjusts arguments so that many concurrent processes
//! never block on shared stdin.

use tracing::warn;

use crate::error::{RunnerError, RunnerResult};

/// Subcommands that cannot run across many modules at once.
const DISABLED_COMMANDS: &[(&str, &str)] = &[
    ("state", "state manipulation requires single-state semantics"),
    ("import", "import targets a single state and resource address"),
    ("taint", "taint targets a single state and resource address"),
    ("untaint", "untaint targets a single state and resource address"),
    ("force-unlock", "lock IDs are specific to one state"),
    ("console", "the console reads from shared stdin"),
    ("login", "credentials are global, not per module"),
    ("logout", "credentials are global, not per module"),
];

/// Subcommands that change or remove infrastructure.
const DESTRUCTIVE_COMMANDS: &[&str] = &["apply", "destroy"];

/// Result of resolving a legacy command name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRewrite {
    /// Wrapped-tool subcommand to run
    pub command: String,
    /// Whether the legacy form implied run-all
    pub run_all: bool,
}

/// Deprecated command names still accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyCommand {
    SpinUp,
    TearDown,
    PlanAll,
    ApplyAll,
    DestroyAll,
    OutputAll,
    ValidateAll,
}

impl LegacyCommand {
    const ALL: [LegacyCommand; 7] = [
        Self::SpinUp,
        Self::TearDown,
        Self::PlanAll,
        Self::ApplyAll,
        Self::DestroyAll,
        Self::OutputAll,
        Self::ValidateAll,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::SpinUp => "spin-up",
            Self::TearDown => "tear-down",
            Self::PlanAll => "plan-all",
            Self::ApplyAll => "apply-all",
            Self::DestroyAll => "destroy-all",
            Self::OutputAll => "output-all",
            Self::ValidateAll => "validate-all",
        }
    }

    pub fn lookup(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// The replacement command for this legacy name.
    pub fn rewrite(&self) -> CommandRewrite {
        let command = match self {
            Self::SpinUp | Self::ApplyAll => "apply",
            Self::TearDown | Self::DestroyAll => "destroy",
            Self::PlanAll => "plan",
            Self::OutputAll => "output",
            Self::ValidateAll => "validate",
        };
        CommandRewrite {
            command: command.to_string(),
            run_all: true,
        }
    }
}

/// Resolve a possibly-legacy command name.
pub fn resolve_command(name: &str) -> CommandRewrite {
    match LegacyCommand::lookup(name) {
        Some(legacy) => {
            let rewrite = legacy.rewrite();
            warn!(
                "'{}' is deprecated, use 'run-all {}' instead",
                legacy.name(),
                rewrite.command
            );
            rewrite
        }
        None => CommandRewrite {
            command: name.to_string(),
            run_all: false,
        },
    }
}

/// Fail fast for subcommands that are disallowed under run-all.
pub fn ensure_run_all_allowed(command: &str) -> RunnerResult<()> {
    match DISABLED_COMMANDS.iter().find(|(name, _)| *name == command) {
        Some((name, reason)) => Err(RunnerError::DisabledCommand {
            command: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Whether the command needs an explicit go-ahead before running.
pub fn requires_confirmation(command: &str) -> bool {
    DESTRUCTIVE_COMMANDS.contains(&command)
}

/// Whether dependents must run before their dependencies.
pub fn runs_in_reverse(command: &str) -> bool {
    command == "destroy"
}

/// Build the argument vector run in every module.
///
/// Input prompts are disabled and destructive commands are auto-approved,
/// since confirmation happens once for the whole stack.
pub fn run_all_args(command: &str, extra: &[String]) -> Vec<String> {
    let mut args = vec![command.to_string()];
    let has = |flag: &str| extra.iter().any(|a| a == flag || a.starts_with(&format!("{}=", flag)));

    if !has("-input") {
        args.push("-input=false".to_string());
    }
    if requires_confirmation(command) && !has("-auto-approve") {
        args.push("-auto-approve".to_string());
    }
    args.extend(extra.iter().cloned());
    args
}
