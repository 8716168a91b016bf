//! Modules: the configuration units a stack is made of.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Runtime status of a module within one run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    /// Not started yet
    #[default]
    Pending,
    /// The wrapped tool is running in this module
    Running,
    /// The wrapped tool exited successfully
    Succeeded,
    /// The wrapped tool failed or could not be started
    Failed,
    /// The module was never run
    Skipped,
}

impl ModuleStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// A single configuration unit, identified by its working directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Module {
    /// Working directory; unique within a stack
    pub path: PathBuf,
    /// Paths of modules this one depends on, in declaration order.
    ///
    /// Before [`crate::Stack::build`] these may be relative to `path`;
    /// afterwards they are absolute and normalised.
    pub dependencies: Vec<PathBuf>,
    /// Dependency outside the requested tree: never executed, but its
    /// outputs may be referenced
    pub assume_already_applied: bool,
    /// Excluded from the current run by include/exclude filters
    pub flag_excluded: bool,
}

impl Module {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            dependencies: Vec::new(),
            assume_already_applied: false,
            flag_excluded: false,
        }
    }

    pub fn depends_on(mut self, dependency: impl Into<PathBuf>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn assume_applied(mut self) -> Self {
        self.assume_already_applied = true;
        self
    }

    pub fn excluded(mut self) -> Self {
        self.flag_excluded = true;
        self
    }

    /// Whether the scheduler runs the wrapped tool here.
    pub fn is_runnable(&self) -> bool {
        !self.flag_excluded && !self.assume_already_applied
    }
}

/// Lexically normalise a path: drop `.` and resolve `..` without touching
/// the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // `..` at the root stays at the root.
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve a declared dependency relative to the declaring module.
pub fn resolve_dependency(module_dir: &Path, dependency: &Path) -> PathBuf {
    if dependency.is_absolute() {
        normalize_path(dependency)
    } else {
        normalize_path(&module_dir.join(dependency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/live/app/./../vpc")),
            PathBuf::from("/live/vpc")
        );
        assert_eq!(normalize_path(Path::new("a/../../b")), PathBuf::from("../b"));
        assert_eq!(normalize_path(Path::new("../../b")), PathBuf::from("../../b"));
        assert_eq!(normalize_path(Path::new("a/../../../b")), PathBuf::from("../../b"));
        assert_eq!(normalize_path(Path::new("/../etc")), PathBuf::from("/etc"));
    }

    #[test]
    fn test_resolve_dependency() {
        let dir = Path::new("/live/prod/app");
        assert_eq!(
            resolve_dependency(dir, Path::new("../vpc")),
            PathBuf::from("/live/prod/vpc")
        );
        assert_eq!(
            resolve_dependency(dir, Path::new("/shared/dns")),
            PathBuf::from("/shared/dns")
        );
    }

    #[test]
    fn test_runnable_flags() {
        assert!(Module::new("/a").is_runnable());
        assert!(!Module::new("/a").excluded().is_runnable());
        assert!(!Module::new("/a").assume_applied().is_runnable());
        assert!(ModuleStatus::Skipped.is_terminal());
        assert!(!ModuleStatus::Running.is_terminal());
    }
}
