//! Module discovery from `stackrun.yaml` marker files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use stackrun_core::Module;

/// Marker file turning a directory into a module.
pub const MODULE_FILE: &str = "stackrun.yaml";

/// Directories never descended into.
const SKIP_DIRS: &[&str] = &[".terraform", ".terragrunt-cache", ".stackrun-cache", ".git"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModuleFile {
    /// Paths relative to the module directory
    dependencies: Vec<PathBuf>,
    /// Exclude this module from run-all
    skip: bool,
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| SKIP_DIRS.contains(&name))
            .unwrap_or(false)
}

/// Every directory under `root` holding a [`MODULE_FILE`], in sorted order.
pub fn discover_modules(root: &Path) -> Result<Vec<Module>> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Working directory not found: {}", root.display()))?;

    let mut modules = Vec::new();
    for entry in WalkDir::new(&root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
    {
        let entry = entry.context("Failed to walk working directory")?;
        if !entry.file_type().is_file() || entry.file_name() != MODULE_FILE {
            continue;
        }
        let Some(dir) = entry.path().parent() else {
            continue;
        };
        modules.push(load_module(dir, entry.path())?);
    }

    debug!("Discovered {} modules under {:?}", modules.len(), root);
    Ok(modules)
}

fn load_module(dir: &Path, file: &Path) -> Result<Module> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let parsed: ModuleFile = if content.trim().is_empty() {
        ModuleFile::default()
    } else {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid module file {}", file.display()))?
    };

    let mut module = Module::new(dir);
    for dep in parsed.dependencies {
        module = module.depends_on(dep);
    }
    if parsed.skip {
        module = module.excluded();
    }
    Ok(module)
}
