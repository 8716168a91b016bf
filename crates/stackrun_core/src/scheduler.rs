//! Parallel run-all scheduler.
//!
//! Every runnable module gets its own task. A task waits until each of its
//! ordering constraints has reached a terminal status, then takes a permit
//! from the parallelism semaphore and runs the executor. Statuses are
//! published on per-module watch channels, so dependents wake exactly when
//! a dependency finishes and unrelated modules never wait on each other.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RunOptions;
use crate::error::CoreResult;
use crate::executor::ModuleExecutor;
use crate::module::{Module, ModuleStatus};
use crate::report::{ModuleOutcome, RunReport, SkipReason};
use crate::stack::Stack;

/// A module changed status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub path: PathBuf,
    pub status: ModuleStatus,
}

/// Runs an executor across a stack.
pub struct Scheduler {
    executor: Arc<dyn ModuleExecutor>,
    options: RunOptions,
    events: broadcast::Sender<StatusEvent>,
}

/// State shared by every module task of one run.
#[derive(Clone)]
struct TaskContext {
    executor: Arc<dyn ModuleExecutor>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    events: broadcast::Sender<StatusEvent>,
    ignore_dependency_errors: bool,
}

impl TaskContext {
    fn publish(&self, tx: &watch::Sender<ModuleStatus>, path: &PathBuf, status: ModuleStatus) {
        tx.send_replace(status);
        let _ = self.events.send(StatusEvent {
            path: path.clone(),
            status,
        });
    }
}

impl Scheduler {
    pub fn new(executor: Arc<dyn ModuleExecutor>, options: RunOptions) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            executor,
            options,
            events,
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Observe status transitions while a run is in progress.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    /// Direct ordering constraints of `module`.
    fn constraints(&self, stack: &Stack, module: &Module) -> Vec<PathBuf> {
        if self.options.ignore_dependency_order {
            Vec::new()
        } else if self.options.reverse_order {
            stack
                .dependents(&module.path)
                .into_iter()
                .map(|m| m.path.clone())
                .collect()
        } else {
            module.dependencies.clone()
        }
    }

    /// Runnable modules `module` must wait for. Constraints on modules that
    /// do not run are followed through to their own constraints.
    fn runnable_constraints(&self, stack: &Stack, module: &Module) -> Vec<PathBuf> {
        let mut waits = Vec::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut queue: VecDeque<PathBuf> = self.constraints(stack, module).into();

        while let Some(path) = queue.pop_front() {
            if !seen.insert(path.clone()) {
                continue;
            }
            let Some(constraint) = stack.get(&path) else {
                continue;
            };
            if constraint.is_runnable() {
                waits.push(path);
            } else {
                queue.extend(self.constraints(stack, constraint));
            }
        }
        waits
    }

    /// Execute every runnable module once.
    ///
    /// Module failures do not stop unrelated modules; they are recorded in
    /// the returned report. Use [`RunReport::into_result`] to turn them into
    /// an error. After `cancel` fires no further module is started.
    pub async fn run(&self, stack: &Stack, cancel: CancellationToken) -> CoreResult<RunReport> {
        self.options.validate()?;

        let mut report = RunReport::default();
        let mut senders: HashMap<PathBuf, watch::Sender<ModuleStatus>> = HashMap::new();
        let mut receivers: HashMap<PathBuf, watch::Receiver<ModuleStatus>> = HashMap::new();

        for module in stack.modules() {
            if module.is_runnable() {
                let (tx, rx) = watch::channel(ModuleStatus::Pending);
                senders.insert(module.path.clone(), tx);
                receivers.insert(module.path.clone(), rx);
            } else {
                let reason = if module.flag_excluded {
                    SkipReason::Excluded
                } else {
                    SkipReason::AssumeApplied
                };
                debug!("Not running {:?}: {}", module.path, reason);
                report.insert(ModuleOutcome::skipped(module.path.clone(), reason));
            }
        }

        let permits = self.options.parallelism.min(Semaphore::MAX_PERMITS);
        let ctx = TaskContext {
            executor: self.executor.clone(),
            semaphore: Arc::new(Semaphore::new(permits)),
            cancel,
            events: self.events.clone(),
            ignore_dependency_errors: self.options.ignore_dependency_errors,
        };

        info!(
            "Running {} of {} modules (parallelism {})",
            senders.len(),
            stack.len(),
            permits
        );

        let mut tasks = JoinSet::new();
        let mut spawned: HashSet<PathBuf> = HashSet::new();
        for module in stack.modules().iter().filter(|m| m.is_runnable()) {
            let Some(tx) = senders.remove(&module.path) else {
                continue;
            };
            let waits: Vec<(PathBuf, watch::Receiver<ModuleStatus>)> = self
                .runnable_constraints(stack, module)
                .into_iter()
                .filter_map(|p| receivers.get(&p).map(|rx| (p, rx.clone())))
                .collect();

            spawned.insert(module.path.clone());
            tasks.spawn(run_module(ctx.clone(), module.clone(), waits, tx));
        }
        drop(receivers);

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    spawned.remove(&outcome.path);
                    report.insert(outcome);
                }
                Err(e) => error!("Module task aborted: {}", e),
            }
        }

        // Tasks that panicked never produced an outcome.
        for path in spawned {
            let mut outcome = ModuleOutcome::skipped(path, SkipReason::Cancelled);
            outcome.status = ModuleStatus::Failed;
            outcome.skip_reason = None;
            outcome.error = Some("module task panicked".to_string());
            report.insert(outcome);
        }

        let failed = report.failed().len();
        if failed > 0 {
            warn!("{} module(s) failed", failed);
        } else {
            info!("All {} runnable modules finished", report.succeeded().len());
        }
        Ok(report)
    }
}

async fn run_module(
    ctx: TaskContext,
    module: Module,
    waits: Vec<(PathBuf, watch::Receiver<ModuleStatus>)>,
    tx: watch::Sender<ModuleStatus>,
) -> ModuleOutcome {
    let path = module.path.clone();

    for (dep, mut rx) in waits {
        let status = rx
            .wait_for(|s| s.is_terminal())
            .await
            .map(|s| *s)
            .unwrap_or(ModuleStatus::Failed);

        if status != ModuleStatus::Succeeded && !ctx.ignore_dependency_errors {
            let reason = if ctx.cancel.is_cancelled() && status == ModuleStatus::Skipped {
                SkipReason::Cancelled
            } else {
                SkipReason::DependencyFailed(dep)
            };
            info!("Skipping {:?}: {}", path, reason);
            ctx.publish(&tx, &path, ModuleStatus::Skipped);
            return ModuleOutcome::skipped(path, reason);
        }
    }

    let permit = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => None,
        permit = ctx.semaphore.clone().acquire_owned() => permit.ok(),
    };
    let Some(_permit) = permit.filter(|_| !ctx.cancel.is_cancelled()) else {
        debug!("Not dispatching {:?}: run cancelled", path);
        ctx.publish(&tx, &path, ModuleStatus::Skipped);
        return ModuleOutcome::skipped(path, SkipReason::Cancelled);
    };

    ctx.publish(&tx, &path, ModuleStatus::Running);
    info!("Module {:?} started", path);
    let started_at = Utc::now();
    let result = ctx.executor.execute(&module).await;
    let finished_at = Utc::now();

    let mut outcome = ModuleOutcome {
        path: path.clone(),
        status: ModuleStatus::Failed,
        skip_reason: None,
        exit_code: None,
        output: String::new(),
        error: None,
        attempts: 1,
        started_at: Some(started_at),
        finished_at: Some(finished_at),
    };

    match result {
        Ok(run) => {
            outcome.exit_code = Some(run.exit_code);
            outcome.attempts = run.attempts;
            if run.is_success() {
                outcome.status = ModuleStatus::Succeeded;
            } else {
                outcome.error = Some(if run.summary.is_empty() {
                    format!("exit code {}", run.exit_code)
                } else {
                    run.summary.clone()
                });
            }
            outcome.output = run.output;
        }
        Err(e) => outcome.error = Some(e.to_string()),
    }

    match &outcome.error {
        None => info!("Module {:?} succeeded", path),
        Some(e) => error!("Module {:?} failed: {}", path, e),
    }
    ctx.publish(&tx, &path, outcome.status);
    outcome
}
