//! Run-all command - run a tool command in every module.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Args;
use dialoguer::Confirm;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use stackrun_cache::SessionToken;
use stackrun_core::{
    CoreError, ModuleExecutor, ModuleStatus, RunAllConfig, RunReport, Scheduler, Stack,
    ToolModuleExecutor,
};
use stackrun_runner::{
    ensure_run_all_allowed, requires_confirmation, resolve_command, run_all_args,
    runs_in_reverse, CliRunnerOptions, CliToolRunner, RetryPolicy, RunConfig, ToolInvocation,
};

use super::{load_stack, StackArgs};
use crate::cache::{ProviderCacheExecutor, RunningCache};

#[derive(Args, Debug)]
pub struct RunAllArgs {
    #[command(flatten)]
    pub stack: StackArgs,

    /// Maximum number of modules running at once
    #[arg(long, env = "STACKRUN_PARALLELISM")]
    pub parallelism: Option<usize>,

    /// Run dependents even when a dependency failed
    #[arg(long, env = "STACKRUN_IGNORE_DEPENDENCY_ERRORS")]
    pub ignore_dependency_errors: bool,

    /// Run every module without waiting for its dependencies
    #[arg(long, env = "STACKRUN_IGNORE_DEPENDENCY_ORDER")]
    pub ignore_dependency_order: bool,

    /// Skip the confirmation prompt for apply/destroy
    #[arg(long, env = "STACKRUN_NON_INTERACTIVE")]
    pub non_interactive: bool,

    /// Wrapped tool binary
    #[arg(long, env = "STACKRUN_TF_PATH")]
    pub tf_path: Option<String>,

    /// Serve provider downloads through the local cache server
    #[arg(long, env = "STACKRUN_PROVIDER_CACHE")]
    pub provider_cache: bool,

    /// Provider cache directory
    #[arg(long, env = "STACKRUN_PROVIDER_CACHE_DIR")]
    pub provider_cache_dir: Option<PathBuf>,

    /// Per-module timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Stream tool output through the log as it arrives
    #[arg(long)]
    pub stream_output: bool,

    /// Log the commands without running them
    #[arg(long)]
    pub dry_run: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,

    /// Tool command to run in each module (e.g. plan, apply)
    pub command: Option<String>,

    /// Extra arguments passed to the tool
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl RunAllArgs {
    fn apply(&self, config: &mut RunAllConfig) {
        self.stack.apply(config);
        if let Some(parallelism) = self.parallelism {
            config.parallelism = parallelism;
        }
        config.ignore_dependency_errors |= self.ignore_dependency_errors;
        config.ignore_dependency_order |= self.ignore_dependency_order;
        if let Some(tf_path) = &self.tf_path {
            config.tf_path = tf_path.clone();
        }
        if let Some(timeout) = self.timeout {
            config.timeout_seconds = timeout;
        }
        config.provider_cache.enabled |= self.provider_cache;
        if self.provider_cache_dir.is_some() {
            config.provider_cache.dir = self.provider_cache_dir.clone();
        }
    }
}

pub async fn execute(args: RunAllArgs, quiet: bool) -> Result<()> {
    let raw = args.command.clone().ok_or(CoreError::MissingCommand)?;
    let command = resolve_command(&raw).command;
    ensure_run_all_allowed(&command)?;

    let mut config = args.stack.load_config()?;
    args.apply(&mut config);
    config.validate()?;

    let working_dir = args.stack.working_dir()?;
    let stack = load_stack(&working_dir, &config)?;
    info!("Running '{}' across {} modules", command, stack.len());

    if !quiet {
        print_plan(&command, &stack);
    }

    if requires_confirmation(&command) && !args.non_interactive && !args.dry_run && !confirm(&command)? {
        println!("Aborted.");
        return Ok(());
    }

    let cache = if config.provider_cache.enabled {
        let default_dir = working_dir.join(".stackrun-cache").join("providers");
        Some(RunningCache::start(&config.provider_cache, &default_dir, SessionToken::generate()).await?)
    } else {
        None
    };

    let mut invocation = ToolInvocation::new(config.tf_path.clone(), &working_dir)
        .args(run_all_args(&command, &args.args));
    if let Some(cache) = &cache {
        invocation = invocation.envs(&cache.env());
    }

    let mut run_config = RunConfig::default().timeout(config.timeout_seconds);
    if args.stream_output {
        run_config = run_config.stream();
    }

    let runner = Arc::new(CliToolRunner::new(CliRunnerOptions {
        dry_run: args.dry_run,
    }));
    let tool = ToolModuleExecutor::new(runner, invocation)
        .with_run_config(run_config)
        .with_retry(RetryPolicy::from_settings(&config.retry)?);
    let executor: Arc<dyn ModuleExecutor> = match &cache {
        Some(cache) => Arc::new(ProviderCacheExecutor::new(Arc::new(tool), cache.service.clone())),
        None => Arc::new(tool),
    };

    let mut options = config.run_options();
    if runs_in_reverse(&command) {
        options = options.reverse();
    }
    let scheduler = Scheduler::new(executor, options);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, not starting any more modules");
            on_signal.cancel();
        }
    });

    let progress = (!quiet).then(|| spawn_progress(&scheduler));
    let result = scheduler.run(&stack, cancel).await;
    if let Some(progress) = progress {
        progress.abort();
    }

    if let Some(cache) = cache {
        cache.stop().await?;
    }

    let report = result?;
    if args.json {
        println!("{}", report.to_json()?);
    } else if !quiet {
        print_summary(&report);
    }
    report.into_result()?;
    Ok(())
}

fn confirm(command: &str) -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        bail!(
            "Refusing to run '{}' across the stack without confirmation; pass --non-interactive",
            command
        );
    }
    let answer = Confirm::new()
        .with_prompt(format!("Are you sure you want to run '{}' in each module?", command))
        .default(false)
        .interact()?;
    Ok(answer)
}

fn print_plan(command: &str, stack: &Stack) {
    println!("📦 Modules for '{}':", command);
    for path in stack.run_order() {
        let Some(module) = stack.get(&path) else {
            continue;
        };
        let note = if module.flag_excluded {
            " (excluded)"
        } else if module.assume_already_applied {
            " (assumed applied)"
        } else {
            ""
        };
        println!("   - {}{}", path.display(), note);
    }
    println!();
}

fn spawn_progress(scheduler: &Scheduler) -> tokio::task::JoinHandle<()> {
    let mut events = scheduler.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match event.status {
                    ModuleStatus::Running => println!("▶️  {}", event.path.display()),
                    ModuleStatus::Succeeded => println!("✅ {}", event.path.display()),
                    ModuleStatus::Failed => println!("❌ {}", event.path.display()),
                    ModuleStatus::Skipped => println!("⏭️  {}", event.path.display()),
                    ModuleStatus::Pending => {}
                },
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_summary(report: &RunReport) {
    println!();
    println!(
        "Succeeded: {}  Failed: {}  Skipped: {}",
        report.succeeded().len(),
        report.failed().len(),
        report.skipped().len()
    );
    for outcome in report.outcomes.values() {
        if let Some(reason) = &outcome.skip_reason {
            if reason.is_failure() {
                println!("   ⏭️  {}: {}", outcome.path.display(), reason);
            }
        } else if let Some(error) = &outcome.error {
            println!("   ❌ {}: {}", outcome.path.display(), error);
        }
    }
}
