//! Retry handling for transient wrapped-tool failures.

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{RunConfig, ToolInvocation};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{ToolOutput, ToolRunner};

/// Error signatures that are worth another attempt.
pub const DEFAULT_RETRYABLE_ERRORS: &[&str] = &[
    r"(?s).*Failed to load state.*tcp.*timeout.*",
    r"(?s).*Failed to load backend.*TLS handshake timeout.*",
    r"(?s).*Creating metric alarm failed.*request to update this alarm is in progress.*",
    r"(?s).*Error installing provider.*TLS handshake timeout.*",
    r"(?s).*Error configuring the backend.*TLS handshake timeout.*",
    r"(?s).*Error installing provider.*tcp.*timeout.*",
    r"(?s).*Error installing provider.*tcp.*connection reset by peer.*",
    r"NoSuchBucket: The specified bucket does not exist",
    r"(?s).*Error creating SSM parameter: TooManyUpdates:.*",
    r"(?s).*app.terraform.io.*: 429 Too Many Requests.*",
    r"(?s).*ssh_exchange_identification.*Connection closed by remote host.*",
    r"(?s).*Client\.Timeout exceeded while awaiting headers.*",
    r"(?s).*Could not download module.*The requested URL returned error: 429.*",
    r"(?s).*423 Locked.*",
];

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_SLEEP_INTERVAL_SECS: u64 = 5;

/// Serializable retry settings, as read from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub sleep_interval_secs: u64,
    /// Replaces the default signatures when non-empty
    pub retryable_errors: Vec<String>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            sleep_interval_secs: DEFAULT_SLEEP_INTERVAL_SECS,
            retryable_errors: Vec::new(),
        }
    }
}

/// Compiled retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub sleep_interval: Duration,
    patterns: Vec<Regex>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            sleep_interval: Duration::from_secs(DEFAULT_SLEEP_INTERVAL_SECS),
            patterns: DEFAULT_RETRYABLE_ERRORS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            sleep_interval: Duration::ZERO,
            patterns: Vec::new(),
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> RunnerResult<Self> {
        let patterns = if settings.retryable_errors.is_empty() {
            Self::default().patterns
        } else {
            settings
                .retryable_errors
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<Vec<_>, _>>()?
        };
        Ok(Self {
            max_attempts: settings.max_attempts.max(1),
            sleep_interval: Duration::from_secs(settings.sleep_interval_secs),
            patterns,
        })
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_sleep_interval(mut self, interval: Duration) -> Self {
        self.sleep_interval = interval;
        self
    }

    pub fn with_patterns(mut self, patterns: &[&str]) -> RunnerResult<Self> {
        self.patterns = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self)
    }

    /// Whether the failed output matches a retryable signature.
    pub fn is_retryable(&self, output: &ToolOutput) -> bool {
        if output.success() {
            return false;
        }
        let text = output.combined_output();
        self.patterns.iter().any(|re| re.is_match(&text))
    }
}

/// Outcome of a retried run.
#[derive(Debug, Clone)]
pub struct RetriedOutput {
    pub output: ToolOutput,
    pub attempts: u32,
}

/// Run the invocation, re-running on retryable failures.
///
/// Non-retryable failures are returned as-is in the output. Exhausting the
/// attempt bound while still failing with a retryable signature yields
/// [`RunnerError::MaxRetriesExceeded`].
pub async fn run_with_retry(
    runner: &dyn ToolRunner,
    invocation: &ToolInvocation,
    run_config: &RunConfig,
    policy: &RetryPolicy,
) -> RunnerResult<RetriedOutput> {
    let mut attempt = 1;
    loop {
        let output = runner.run(invocation, run_config).await?;
        if !policy.is_retryable(&output) {
            return Ok(RetriedOutput {
                output,
                attempts: attempt,
            });
        }

        if attempt >= policy.max_attempts {
            warn!(
                "'{}' in {:?} still failing after {} attempts",
                invocation.command_line(),
                invocation.working_dir,
                attempt
            );
            return Err(RunnerError::MaxRetriesExceeded {
                command: invocation.command_line(),
                working_dir: invocation.working_dir.clone(),
                attempts: attempt,
                output: output.combined_output(),
            });
        }

        info!(
            "Retryable error in {:?} (attempt {}/{}), sleeping {:?}: {}",
            invocation.working_dir,
            attempt,
            policy.max_attempts,
            policy.sleep_interval,
            output.summary()
        );
        tokio::time::sleep(policy.sleep_interval).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockResponse, MockToolRunner};

    fn quick_policy() -> RetryPolicy {
        RetryPolicy::default().with_sleep_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let runner = MockToolRunner::new().with_responses(vec![
            MockResponse::failure(1, "Error installing provider: TLS handshake timeout"),
            MockResponse::success("ok"),
        ]);
        let inv = ToolInvocation::new("terraform", "/stack/app").arg("init");

        let result = run_with_retry(&runner, &inv, &RunConfig::default(), &quick_policy())
            .await
            .unwrap();

        assert!(result.output.success());
        assert_eq!(result.attempts, 2);
        assert_eq!(runner.call_count(), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_returns_immediately() {
        let runner = MockToolRunner::new()
            .add_response(MockResponse::failure(1, "Error: Unsupported argument"));
        let inv = ToolInvocation::new("terraform", "/stack/app").arg("plan");

        let result = run_with_retry(&runner, &inv, &RunConfig::default(), &quick_policy())
            .await
            .unwrap();

        assert_eq!(result.output.exit_code, 1);
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_max_retries_exceeded_names_command_and_dir() {
        let runner = MockToolRunner::new()
            .add_response(MockResponse::failure(1, "Client.Timeout exceeded while awaiting headers"));
        let inv = ToolInvocation::new("terraform", "/stack/db").arg("init");
        let policy = quick_policy().with_max_attempts(2);

        let err = run_with_retry(&runner, &inv, &RunConfig::default(), &policy)
            .await
            .unwrap_err();

        assert_eq!(runner.call_count(), 2);
        let msg = err.to_string();
        assert!(msg.contains("terraform init"));
        assert!(msg.contains("/stack/db"));
    }

    #[test]
    fn test_settings_reject_bad_pattern() {
        let settings = RetrySettings {
            retryable_errors: vec!["(unclosed".to_string()],
            ..Default::default()
        };
        assert!(RetryPolicy::from_settings(&settings).is_err());
    }
}
