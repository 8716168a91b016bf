//! Per-module outcomes of a run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ModuleError, MultiError};
use crate::module::ModuleStatus;

/// Why a module never ran.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Filtered out of the run
    Excluded,
    /// External dependency treated as already applied
    AssumeApplied,
    /// A dependency did not succeed
    DependencyFailed(PathBuf),
    /// Cancellation arrived before dispatch
    Cancelled,
}

impl SkipReason {
    /// Whether this skip makes the run fail.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::DependencyFailed(_))
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Excluded => write!(f, "excluded"),
            Self::AssumeApplied => write!(f, "assumed already applied"),
            Self::DependencyFailed(dep) => write!(f, "dependency {} did not succeed", dep.display()),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Final record for one module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleOutcome {
    pub path: PathBuf,
    pub status: ModuleStatus,
    pub skip_reason: Option<SkipReason>,
    pub exit_code: Option<i64>,
    /// Captured tool output
    pub output: String,
    /// Error text when failed
    pub error: Option<String>,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ModuleOutcome {
    pub fn skipped(path: impl Into<PathBuf>, reason: SkipReason) -> Self {
        Self {
            path: path.into(),
            status: ModuleStatus::Skipped,
            skip_reason: Some(reason),
            exit_code: None,
            output: String::new(),
            error: None,
            attempts: 0,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Outcome of every module in a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub outcomes: BTreeMap<PathBuf, ModuleOutcome>,
}

impl RunReport {
    pub fn insert(&mut self, outcome: ModuleOutcome) {
        self.outcomes.insert(outcome.path.clone(), outcome);
    }

    pub fn get(&self, path: &Path) -> Option<&ModuleOutcome> {
        self.outcomes.get(path)
    }

    pub fn status(&self, path: &Path) -> Option<ModuleStatus> {
        self.get(path).map(|o| o.status)
    }

    fn with_status(&self, status: ModuleStatus) -> Vec<&PathBuf> {
        self.outcomes
            .values()
            .filter(|o| o.status == status)
            .map(|o| &o.path)
            .collect()
    }

    pub fn succeeded(&self) -> Vec<&PathBuf> {
        self.with_status(ModuleStatus::Succeeded)
    }

    pub fn failed(&self) -> Vec<&PathBuf> {
        self.with_status(ModuleStatus::Failed)
    }

    pub fn skipped(&self) -> Vec<&PathBuf> {
        self.with_status(ModuleStatus::Skipped)
    }

    /// One error per failed module and per module skipped because of a
    /// failure.
    pub fn errors(&self) -> MultiError {
        let errors = self
            .outcomes
            .values()
            .filter_map(|o| match (&o.status, &o.skip_reason) {
                (ModuleStatus::Failed, _) => Some(ModuleError {
                    path: o.path.clone(),
                    message: o.error.clone().unwrap_or_else(|| "failed".to_string()),
                }),
                (ModuleStatus::Skipped, Some(reason)) if reason.is_failure() => Some(ModuleError {
                    path: o.path.clone(),
                    message: format!("skipped: {}", reason),
                }),
                _ => None,
            })
            .collect();
        MultiError { errors }
    }

    pub fn is_success(&self) -> bool {
        self.errors().is_empty() && !self.was_cancelled()
    }

    pub fn was_cancelled(&self) -> bool {
        self.outcomes
            .values()
            .any(|o| o.skip_reason == Some(SkipReason::Cancelled))
    }

    /// Serialise the report for machine consumption.
    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    /// Turn the report into an error if anything did not complete.
    pub fn into_result(self) -> CoreResult<Self> {
        let errors = self.errors();
        if !errors.is_empty() {
            return Err(CoreError::RunAll(errors));
        }
        if self.was_cancelled() {
            return Err(CoreError::Cancelled);
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(path: &str) -> ModuleOutcome {
        ModuleOutcome {
            status: ModuleStatus::Failed,
            skip_reason: None,
            error: Some("exit code 1: boom".to_string()),
            ..ModuleOutcome::skipped(path, SkipReason::Excluded)
        }
    }

    #[test]
    fn test_excluded_skips_are_not_errors() {
        let mut report = RunReport::default();
        report.insert(ModuleOutcome::skipped("/s/a", SkipReason::Excluded));
        report.insert(ModuleOutcome::skipped("/s/b", SkipReason::AssumeApplied));
        assert!(report.is_success());
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_failures_and_dependent_skips_are_errors() {
        let mut report = RunReport::default();
        report.insert(failed("/s/db"));
        report.insert(ModuleOutcome::skipped(
            "/s/app",
            SkipReason::DependencyFailed(PathBuf::from("/s/db")),
        ));

        match report.into_result() {
            Err(CoreError::RunAll(errors)) => {
                assert_eq!(errors.len(), 2);
                assert!(errors.to_string().contains("dependency /s/db did not succeed"));
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_report_json_keys_by_path() {
        let mut report = RunReport::default();
        report.insert(failed("/s/db"));
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["outcomes"]["/s/db"]["status"], "failed");
    }

    #[test]
    fn test_cancelled_run() {
        let mut report = RunReport::default();
        report.insert(ModuleOutcome::skipped("/s/a", SkipReason::Cancelled));
        assert!(matches!(report.into_result(), Err(CoreError::Cancelled)));
    }
}
