//! End-to-end scheduling tests driving the wrapped tool through the mock runner.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use stackrun_core::{
    FilterOptions, Module, ModuleStatus, RunOptions, Scheduler, SkipReason, Stack, StackOptions,
    ToolModuleExecutor,
};
use stackrun_runner::{MockResponse, MockToolRunner, RetryPolicy, ToolInvocation};
use tokio_util::sync::CancellationToken;

fn scheduler(mock: &MockToolRunner, options: RunOptions) -> Scheduler {
    let executor = ToolModuleExecutor::new(
        Arc::new(mock.clone()),
        ToolInvocation::new("terraform", ".").arg("apply"),
    )
    .with_retry(RetryPolicy::none());
    Scheduler::new(Arc::new(executor), options)
}

fn stack(modules: Vec<Module>) -> Stack {
    Stack::build(modules, StackOptions::default()).unwrap()
}

/// vpc <- db <- app, vpc <- cache
fn layered() -> Vec<Module> {
    vec![
        Module::new("/live/app").depends_on("../db").depends_on("../cache"),
        Module::new("/live/db").depends_on("../vpc"),
        Module::new("/live/cache").depends_on("../vpc"),
        Module::new("/live/vpc"),
    ]
}

#[tokio::test]
async fn test_dependencies_finish_before_dependents_start() {
    let mock = MockToolRunner::new()
        .respond_in("/live/vpc", MockResponse::success("").with_duration(30))
        .respond_in("/live/db", MockResponse::success("").with_duration(20))
        .respond_in("/live/cache", MockResponse::success("").with_duration(10));
    let stack = stack(layered());

    let report = scheduler(&mock, RunOptions::default())
        .run(&stack, CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_success());

    let calls = mock.get_calls();
    assert_eq!(calls.len(), 4);
    for module in stack.modules() {
        let call = calls.iter().find(|c| c.working_dir == module.path).unwrap();
        for dep in &module.dependencies {
            let dep_call = calls.iter().find(|c| &c.working_dir == dep).unwrap();
            assert!(dep_call.finished_at.unwrap() <= call.started_at);
        }
    }
}

#[tokio::test]
async fn test_failed_module_blocks_dependents_only() {
    let mock = MockToolRunner::new().respond_in("/live/db", MockResponse::failure(1, "Error: boom"));
    let stack = stack(layered());

    let report = scheduler(&mock, RunOptions::default())
        .run(&stack, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status(Path::new("/live/db")), Some(ModuleStatus::Failed));
    assert_eq!(report.status(Path::new("/live/cache")), Some(ModuleStatus::Succeeded));
    assert_eq!(report.status(Path::new("/live/app")), Some(ModuleStatus::Skipped));
    assert!(mock.calls_in("/live/app").is_empty());

    let err = report.into_result().unwrap_err().to_string();
    assert!(err.contains("/live/db"));
    assert!(err.contains("Error: boom"));
    assert!(err.contains("/live/app"));
}

#[tokio::test]
async fn test_ignore_dependency_errors_runs_dependents() {
    let mock = MockToolRunner::new().respond_in("/live/db", MockResponse::failure(1, "Error: boom"));
    let stack = stack(layered());

    let report = scheduler(&mock, RunOptions::default().ignore_dependency_errors())
        .run(&stack, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status(Path::new("/live/app")), Some(ModuleStatus::Succeeded));
    assert_eq!(mock.call_count(), 4);
    assert_eq!(report.errors().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallelism_bounds_concurrent_modules() {
    let mut mock = MockToolRunner::new();
    let mut modules = Vec::new();
    for i in 0..6 {
        let dir = format!("/live/m{}", i);
        mock = mock.respond_in(dir.clone(), MockResponse::success("").with_duration(100));
        modules.push(Module::new(dir));
    }
    let stack = stack(modules);

    let started = Instant::now();
    let report = scheduler(&mock, RunOptions::default().parallelism(2))
        .run(&stack, CancellationToken::new())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(report.is_success());
    assert_eq!(mock.peak_concurrency(), 2);
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(1500));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_modules_run_concurrently() {
    let mut mock = MockToolRunner::new();
    let mut modules = Vec::new();
    for i in 0..4 {
        let dir = format!("/live/m{}", i);
        mock = mock.respond_in(dir.clone(), MockResponse::success("").with_duration(150));
        modules.push(Module::new(dir));
    }
    let stack = stack(modules);

    let started = Instant::now();
    scheduler(&mock, RunOptions::default())
        .run(&stack, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(mock.peak_concurrency(), 4);
    assert!(started.elapsed() < Duration::from_millis(550));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ignore_dependency_order_starts_everything() {
    let mock = MockToolRunner::new()
        .respond_in("/live/vpc", MockResponse::failure(1, "boom").with_duration(100))
        .respond_in("/live/db", MockResponse::success("").with_duration(100));
    let stack = stack(vec![
        Module::new("/live/db").depends_on("../vpc"),
        Module::new("/live/vpc"),
    ]);

    let report = scheduler(&mock, RunOptions::default().ignore_dependency_order())
        .run(&stack, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(mock.peak_concurrency(), 2);
    assert_eq!(report.status(Path::new("/live/db")), Some(ModuleStatus::Succeeded));
    assert_eq!(report.status(Path::new("/live/vpc")), Some(ModuleStatus::Failed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ordering_holds_through_excluded_module() {
    let mock = MockToolRunner::new()
        .respond_in("/live/vpc", MockResponse::success("").with_duration(200));
    let stack = stack(vec![
        Module::new("/live/vpc"),
        Module::new("/live/db").depends_on("../vpc").excluded(),
        Module::new("/live/app").depends_on("../db"),
    ]);

    let report = scheduler(&mock, RunOptions::default())
        .run(&stack, CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_success());

    let vpc = &mock.calls_in("/live/vpc")[0];
    let app = &mock.calls_in("/live/app")[0];
    assert!(vpc.finished_at.unwrap() <= app.started_at);
    assert_eq!(mock.peak_concurrency(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_destroy_order_holds_through_excluded_module() {
    let mock = MockToolRunner::new()
        .respond_in("/live/app", MockResponse::success("").with_duration(200));
    let stack = stack(vec![
        Module::new("/live/vpc"),
        Module::new("/live/db").depends_on("../vpc").excluded(),
        Module::new("/live/app").depends_on("../db"),
    ]);

    scheduler(&mock, RunOptions::default().reverse())
        .run(&stack, CancellationToken::new())
        .await
        .unwrap();

    let app = &mock.calls_in("/live/app")[0];
    let vpc = &mock.calls_in("/live/vpc")[0];
    assert!(app.finished_at.unwrap() <= vpc.started_at);
}

#[tokio::test]
async fn test_failure_propagates_through_excluded_module() {
    let mock = MockToolRunner::new().respond_in("/live/vpc", MockResponse::failure(1, "Error: boom"));
    let stack = stack(vec![
        Module::new("/live/vpc"),
        Module::new("/live/db").depends_on("../vpc").excluded(),
        Module::new("/live/app").depends_on("../db"),
    ]);

    let report = scheduler(&mock, RunOptions::default())
        .run(&stack, CancellationToken::new())
        .await
        .unwrap();

    assert!(mock.calls_in("/live/app").is_empty());
    assert_eq!(
        report.get(Path::new("/live/app")).unwrap().skip_reason,
        Some(SkipReason::DependencyFailed(PathBuf::from("/live/vpc")))
    );
}

#[tokio::test]
async fn test_destroy_order_runs_dependents_first() {
    let mock = MockToolRunner::new();
    let stack = stack(vec![
        Module::new("/live/db").depends_on("../vpc"),
        Module::new("/live/vpc"),
    ]);

    scheduler(&mock, RunOptions::default().reverse().parallelism(1))
        .run(&stack, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        mock.called_dirs(),
        vec![PathBuf::from("/live/db"), PathBuf::from("/live/vpc")]
    );
}

#[tokio::test]
async fn test_cancellation_stops_new_dispatch() {
    let mock = MockToolRunner::new()
        .respond_in("/live/vpc", MockResponse::success("").with_duration(200));
    let stack = stack(layered());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = scheduler(&mock, RunOptions::default())
        .run(&stack, cancel)
        .await
        .unwrap();

    // The module already running completes; nothing after it starts.
    assert_eq!(mock.called_dirs(), vec![PathBuf::from("/live/vpc")]);
    assert_eq!(report.status(Path::new("/live/vpc")), Some(ModuleStatus::Succeeded));
    assert_eq!(
        report.get(Path::new("/live/db")).unwrap().skip_reason,
        Some(SkipReason::Cancelled)
    );
    assert!(report.was_cancelled());
}

#[tokio::test]
async fn test_filtered_modules_are_not_executed() {
    let mock = MockToolRunner::new();
    let mut stack = Stack::build(
        layered(),
        StackOptions {
            working_dir: Some(PathBuf::from("/live")),
            ..Default::default()
        },
    )
    .unwrap();
    stack
        .filter(&FilterOptions {
            exclude_dirs: vec!["cache".to_string()],
            ..Default::default()
        })
        .unwrap();

    let report = scheduler(&mock, RunOptions::default())
        .run(&stack, CancellationToken::new())
        .await
        .unwrap();

    assert!(mock.calls_in("/live/cache").is_empty());
    assert_eq!(report.status(Path::new("/live/app")), Some(ModuleStatus::Succeeded));
    assert_eq!(
        report.get(Path::new("/live/cache")).unwrap().skip_reason,
        Some(SkipReason::Excluded)
    );
}

#[tokio::test]
async fn test_empty_stack_is_trivially_successful() {
    let mock = MockToolRunner::new();
    let report = scheduler(&mock, RunOptions::default())
        .run(&stack(Vec::new()), CancellationToken::new())
        .await
        .unwrap();
    assert!(report.outcomes.is_empty());
    assert!(report.into_result().is_ok());
}
