//! Run-all configuration.
//!
//! Values are read from an optional YAML file and then overridden by
//! command-line flags; the library only sees the merged result.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stackrun_runner::RetrySettings;
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Effectively unbounded parallelism.
pub const DEFAULT_PARALLELISM: usize = 1_000_000;

/// How [`crate::Stack::build`] treats dependency paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackOptions {
    /// Root of the requested subtree. Modules outside it are assumed applied.
    pub working_dir: Option<PathBuf>,
    /// Drop edges to paths that match no discovered module
    pub ignore_external_dependencies: bool,
    /// Add unknown dependency paths as assume-applied external modules
    pub include_external_dependencies: bool,
}

/// Include/exclude selection applied by [`crate::Stack::filter`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterOptions {
    pub include_dirs: Vec<String>,
    pub exclude_dirs: Vec<String>,
    /// Only run included modules, not their dependencies
    pub strict_include: bool,
}

impl FilterOptions {
    pub fn is_empty(&self) -> bool {
        self.include_dirs.is_empty() && self.exclude_dirs.is_empty()
    }
}

/// Scheduler behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// Upper bound on concurrently running modules
    pub parallelism: usize,
    /// Run dependents even when a dependency failed
    pub ignore_dependency_errors: bool,
    /// Drop all ordering constraints
    pub ignore_dependency_order: bool,
    /// Run dependents before their dependencies (destroy)
    pub reverse_order: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            ignore_dependency_errors: false,
            ignore_dependency_order: false,
            reverse_order: false,
        }
    }
}

impl RunOptions {
    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn ignore_dependency_errors(mut self) -> Self {
        self.ignore_dependency_errors = true;
        self
    }

    pub fn ignore_dependency_order(mut self) -> Self {
        self.ignore_dependency_order = true;
        self
    }

    pub fn reverse(mut self) -> Self {
        self.reverse_order = true;
        self
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.parallelism == 0 {
            return Err(CoreError::InvalidConfig(
                "parallelism must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Provider cache settings, consumed by the binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderCacheSettings {
    pub enabled: bool,
    /// Cache directory; defaults to `<working_dir>/.stackrun-cache/providers`
    pub dir: Option<PathBuf>,
    pub host: String,
    /// 0 picks an ephemeral port
    pub port: u16,
    /// Registries whose provider downloads are intercepted
    pub registries: Vec<String>,
}

impl Default for ProviderCacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            host: "127.0.0.1".to_string(),
            port: 0,
            registries: vec![
                "registry.terraform.io".to_string(),
                "registry.opentofu.org".to_string(),
            ],
        }
    }
}

/// Complete run-all configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunAllConfig {
    pub parallelism: usize,
    pub ignore_dependency_errors: bool,
    pub ignore_dependency_order: bool,
    pub ignore_external_dependencies: bool,
    pub include_external_dependencies: bool,
    pub include_dirs: Vec<String>,
    pub exclude_dirs: Vec<String>,
    pub strict_include: bool,
    /// Wrapped tool binary
    pub tf_path: String,
    /// Per-module timeout in seconds (0 = none)
    pub timeout_seconds: u64,
    pub retry: RetrySettings,
    pub provider_cache: ProviderCacheSettings,
}

impl Default for RunAllConfig {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            ignore_dependency_errors: false,
            ignore_dependency_order: false,
            ignore_external_dependencies: false,
            include_external_dependencies: false,
            include_dirs: Vec::new(),
            exclude_dirs: Vec::new(),
            strict_include: false,
            tf_path: stackrun_runner::DEFAULT_TOOL.to_string(),
            timeout_seconds: 0,
            retry: RetrySettings::default(),
            provider_cache: ProviderCacheSettings::default(),
        }
    }
}

impl RunAllConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        debug!("Loaded run-all configuration from {:?}", path);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        self.run_options().validate()
    }

    pub fn stack_options(&self, working_dir: &Path) -> StackOptions {
        StackOptions {
            working_dir: Some(working_dir.to_path_buf()),
            ignore_external_dependencies: self.ignore_external_dependencies,
            include_external_dependencies: self.include_external_dependencies,
        }
    }

    pub fn filter_options(&self) -> FilterOptions {
        FilterOptions {
            include_dirs: self.include_dirs.clone(),
            exclude_dirs: self.exclude_dirs.clone(),
            strict_include: self.strict_include,
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            parallelism: self.parallelism,
            ignore_dependency_errors: self.ignore_dependency_errors,
            ignore_dependency_order: self.ignore_dependency_order,
            reverse_order: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RunAllConfig::default();
        assert_eq!(config.parallelism, DEFAULT_PARALLELISM);
        assert_eq!(config.tf_path, "terraform");
        assert!(!config.provider_cache.enabled);
    }

    #[test]
    fn test_load_partial_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stackrun.config.yaml");
        fs::write(
            &path,
            "parallelism: 4\nexclude_dirs:\n  - legacy/**\nretry:\n  max_attempts: 5\n",
        )
        .unwrap();

        let config = RunAllConfig::load(&path).unwrap();
        assert_eq!(config.parallelism, 4);
        assert_eq!(config.exclude_dirs, vec!["legacy/**".to_string()]);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.sleep_interval_secs, 5);
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "parallelism: 0\n").unwrap();

        assert!(matches!(
            RunAllConfig::load(&path),
            Err(CoreError::InvalidConfig(_))
        ));
    }
}
