//! Mock tool runner for testing.
//!
//! Provides a configurable mock implementation of the ToolRunner trait
//! for use in unit tests without requiring the wrapped tool binary.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::config::{RunConfig, ToolInvocation};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{ToolOutput, ToolRunner};

/// Predefined mock response for a tool execution.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl MockResponse {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            duration_ms: 0,
        }
    }

    pub fn failure(exit_code: i64, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            duration_ms: 0,
        }
    }

    /// Make the call take this long in real time.
    pub fn with_duration(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }
}

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: HashMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Mock tool runner for testing.
///
/// This runner captures all calls and returns predefined responses,
/// allowing tests to verify execution behavior without spawning
/// processes. It also tracks how many calls were in flight at once.
#[derive(Clone)]
pub struct MockToolRunner {
    missing_programs: Arc<RwLock<HashSet<String>>>,
    /// Responses returned in order, cycling, for directories without a
    /// dedicated response.
    responses: Arc<RwLock<Vec<MockResponse>>>,
    response_index: Arc<AtomicUsize>,
    /// Responses keyed by working directory.
    dir_responses: Arc<RwLock<HashMap<PathBuf, Vec<MockResponse>>>>,
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
    dir_errors: Arc<RwLock<HashMap<PathBuf, String>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl Default for MockToolRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockToolRunner {
    /// Create a new mock runner.
    pub fn new() -> Self {
        Self {
            missing_programs: Arc::new(RwLock::new(HashSet::new())),
            responses: Arc::new(RwLock::new(Vec::new())),
            response_index: Arc::new(AtomicUsize::new(0)),
            dir_responses: Arc::new(RwLock::new(HashMap::new())),
            captured_calls: Arc::new(RwLock::new(Vec::new())),
            dir_errors: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Report `program` as not installed.
    pub fn without_program(self, program: impl Into<String>) -> Self {
        self.missing_programs.write().insert(program.into());
        self
    }

    /// Add a mock response for the next run call.
    pub fn add_response(self, response: MockResponse) -> Self {
        self.responses.write().push(response);
        self
    }

    /// Set multiple responses.
    pub fn with_responses(self, responses: Vec<MockResponse>) -> Self {
        *self.responses.write() = responses;
        self
    }

    /// Respond to calls in `dir` with `response`. Repeated calls for the
    /// same directory consume responses in order and repeat the last one.
    pub fn respond_in(self, dir: impl Into<PathBuf>, response: MockResponse) -> Self {
        self.dir_responses
            .write()
            .entry(dir.into())
            .or_default()
            .push(response);
        self
    }

    /// Fail to spawn the tool in `dir`, as if the process could not start.
    pub fn error_in(self, dir: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        self.dir_errors.write().insert(dir.into(), message.into());
        self
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    /// Get the number of calls made.
    pub fn call_count(&self) -> usize {
        self.captured_calls.read().len()
    }

    /// Working directories in call order.
    pub fn called_dirs(&self) -> Vec<PathBuf> {
        self.captured_calls
            .read()
            .iter()
            .map(|c| c.working_dir.clone())
            .collect()
    }

    /// Calls made in a given working directory.
    pub fn calls_in(&self, dir: impl Into<PathBuf>) -> Vec<CapturedCall> {
        let dir = dir.into();
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.working_dir == dir)
            .cloned()
            .collect()
    }

    /// Highest number of calls observed running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_response(&self, dir: &PathBuf) -> MockResponse {
        let seen = self
            .captured_calls
            .read()
            .iter()
            .filter(|c| &c.working_dir == dir)
            .count();
        if let Some(list) = self.dir_responses.read().get(dir) {
            if let Some(last) = list.last() {
                // `seen` includes the call being served.
                return list.get(seen.saturating_sub(1)).unwrap_or(last).clone();
            }
        }

        let responses = self.responses.read();
        if responses.is_empty() {
            return MockResponse::success("");
        }
        let index = self.response_index.fetch_add(1, Ordering::SeqCst);
        responses
            .get(index % responses.len())
            .cloned()
            .unwrap_or_else(|| MockResponse::success(""))
    }

    fn spawn_error(&self, dir: &PathBuf) -> RunnerResult<()> {
        match self.dir_errors.read().get(dir) {
            Some(message) => Err(RunnerError::ExecutionFailed(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ToolRunner for MockToolRunner {
    async fn is_available(&self, program: &str) -> RunnerResult<bool> {
        Ok(!self.missing_programs.read().contains(program))
    }

    async fn run(
        &self,
        invocation: &ToolInvocation,
        _run_config: &RunConfig,
    ) -> RunnerResult<ToolOutput> {
        let started_at = Utc::now();
        let index = {
            let mut calls = self.captured_calls.write();
            calls.push(CapturedCall {
                program: invocation.program.clone(),
                args: invocation.args.clone(),
                working_dir: invocation.working_dir.clone(),
                env: invocation.env.clone(),
                started_at,
                finished_at: None,
            });
            calls.len() - 1
        };

        self.spawn_error(&invocation.working_dir)?;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        let response = self.next_response(&invocation.working_dir);
        if response.duration_ms > 0 {
            tokio::time::sleep(Duration::from_millis(response.duration_ms)).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let finished_at = Utc::now();
        if let Some(call) = self.captured_calls.write().get_mut(index) {
            call.finished_at = Some(finished_at);
        }

        Ok(ToolOutput {
            exit_code: response.exit_code,
            stdout: response.stdout,
            stderr: response.stderr,
            started_at,
            finished_at,
            duration_ms: response.duration_ms,
        })
    }
}
