//! Stack construction: dependency resolution, cycle detection, filtering.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use glob::Pattern;
use tracing::{debug, info, warn};

use crate::config::{FilterOptions, StackOptions};
use crate::error::{CoreError, CoreResult};
use crate::module::{normalize_path, resolve_dependency, Module};

/// All modules of a run plus their dependency edges.
///
/// Modules keep discovery order; that order is only used to make output
/// and error messages deterministic.
#[derive(Debug, Clone)]
pub struct Stack {
    modules: Vec<Module>,
    index: HashMap<PathBuf, usize>,
    options: StackOptions,
}

impl Stack {
    /// Build a stack from discovered modules.
    ///
    /// Declared dependencies are resolved relative to their module and
    /// checked against the discovered set. The resulting graph must be
    /// acyclic.
    pub fn build(modules: Vec<Module>, options: StackOptions) -> CoreResult<Self> {
        let mut stack = Self {
            modules: Vec::with_capacity(modules.len()),
            index: HashMap::new(),
            options,
        };

        for mut module in modules {
            module.path = normalize_path(&module.path);
            if stack.index.contains_key(&module.path) {
                return Err(CoreError::DuplicateModule(module.path));
            }
            if let Some(root) = &stack.options.working_dir {
                if !module.path.starts_with(normalize_path(root)) && !module.assume_already_applied {
                    debug!("{:?} is outside {:?}, assuming already applied", module.path, root);
                    module.assume_already_applied = true;
                }
            }
            stack.index.insert(module.path.clone(), stack.modules.len());
            stack.modules.push(module);
        }

        stack.resolve_dependencies()?;
        stack.check_cycles()?;

        info!("Built stack with {} modules", stack.modules.len());
        Ok(stack)
    }

    fn resolve_dependencies(&mut self) -> CoreResult<()> {
        let mut externals: Vec<Module> = Vec::new();

        for i in 0..self.modules.len() {
            let module_path = self.modules[i].path.clone();
            let declared = std::mem::take(&mut self.modules[i].dependencies);
            let mut resolved: Vec<PathBuf> = Vec::with_capacity(declared.len());

            for dep in declared {
                let dep = resolve_dependency(&module_path, &dep);
                if resolved.contains(&dep) {
                    continue;
                }
                let known = self.index.contains_key(&dep) || externals.iter().any(|m| m.path == dep);
                if !known {
                    if self.options.ignore_external_dependencies {
                        warn!(
                            "Ignoring dependency {:?} of {:?}: not part of the stack",
                            dep, module_path
                        );
                        continue;
                    }
                    if !self.options.include_external_dependencies {
                        return Err(CoreError::MissingDependency {
                            module: module_path,
                            dependency: dep,
                        });
                    }
                    debug!("Adding external dependency {:?} as already applied", dep);
                    externals.push(Module::new(dep.clone()).assume_applied());
                }
                resolved.push(dep);
            }

            self.modules[i].dependencies = resolved;
        }

        for external in externals {
            self.index.insert(external.path.clone(), self.modules.len());
            self.modules.push(external);
        }
        Ok(())
    }

    /// Depth-first search keeping the active path; revisiting a node that
    /// is still on the path closes a cycle.
    fn check_cycles(&self) -> CoreResult<()> {
        let mut done: HashSet<usize> = HashSet::new();
        let mut path: Vec<usize> = Vec::new();

        for start in 0..self.modules.len() {
            if !done.contains(&start) {
                self.visit(start, &mut path, &mut done)?;
            }
        }
        Ok(())
    }

    fn visit(&self, node: usize, path: &mut Vec<usize>, done: &mut HashSet<usize>) -> CoreResult<()> {
        if let Some(pos) = path.iter().position(|&n| n == node) {
            let mut cycle: Vec<PathBuf> = path[pos..]
                .iter()
                .map(|&n| self.modules[n].path.clone())
                .collect();
            cycle.push(self.modules[node].path.clone());
            return Err(CoreError::DependencyCycle(cycle));
        }
        if done.contains(&node) {
            return Ok(());
        }

        path.push(node);
        for dep in &self.modules[node].dependencies {
            if let Some(&next) = self.index.get(dep) {
                self.visit(next, path, done)?;
            }
        }
        path.pop();
        done.insert(node);
        Ok(())
    }

    /// Apply include/exclude globs to every module's `flag_excluded`.
    ///
    /// Modules are never removed. Exclusions already present (for example
    /// declared by discovery) are kept.
    pub fn filter(&mut self, filter: &FilterOptions) -> CoreResult<()> {
        if filter.is_empty() {
            return Ok(());
        }

        let includes = self.compile_patterns(&filter.include_dirs)?;
        let excludes = self.compile_patterns(&filter.exclude_dirs)?;

        let mut keep: HashSet<usize> = (0..self.modules.len()).collect();
        if !includes.is_empty() {
            keep = self
                .modules
                .iter()
                .enumerate()
                .filter(|(_, m)| matches_any(&includes, &m.path))
                .map(|(i, _)| i)
                .collect();

            if !filter.strict_include {
                let mut queue: VecDeque<usize> = keep.iter().copied().collect();
                while let Some(i) = queue.pop_front() {
                    for dep in &self.modules[i].dependencies {
                        if let Some(&d) = self.index.get(dep) {
                            if keep.insert(d) {
                                queue.push_back(d);
                            }
                        }
                    }
                }
            }
        }

        let mut excluded = 0;
        for (i, module) in self.modules.iter_mut().enumerate() {
            let out = !keep.contains(&i) || matches_any(&excludes, &module.path);
            if out {
                module.flag_excluded = true;
            }
            if module.flag_excluded {
                excluded += 1;
            }
        }
        info!("{} of {} modules excluded from the run", excluded, self.modules.len());
        Ok(())
    }

    fn compile_patterns(&self, patterns: &[String]) -> CoreResult<Vec<Pattern>> {
        patterns
            .iter()
            .map(|raw| {
                let full = match &self.options.working_dir {
                    Some(root) if !Path::new(raw).is_absolute() => {
                        root.join(raw).to_string_lossy().into_owned()
                    }
                    _ => raw.clone(),
                };
                let full = normalize_path(Path::new(&full)).to_string_lossy().into_owned();
                Pattern::new(&full).map_err(|e| CoreError::InvalidPattern {
                    pattern: raw.clone(),
                    message: e.to_string(),
                })
            })
            .collect()
    }

    /// Modules in discovery order.
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn get(&self, path: &Path) -> Option<&Module> {
        self.index.get(path).map(|&i| &self.modules[i])
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.index.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn options(&self) -> &StackOptions {
        &self.options
    }

    /// Modules that directly depend on `path`.
    pub fn dependents(&self, path: &Path) -> Vec<&Module> {
        self.modules
            .iter()
            .filter(|m| m.dependencies.iter().any(|d| d == path))
            .collect()
    }

    /// Every module reachable through dependency edges from `path`.
    pub fn transitive_dependencies(&self, path: &Path) -> HashSet<PathBuf> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&Path> = VecDeque::from([path]);
        while let Some(current) = queue.pop_front() {
            if let Some(module) = self.get(current) {
                for dep in &module.dependencies {
                    if seen.insert(dep.clone()) {
                        queue.push_back(dep.as_path());
                    }
                }
            }
        }
        seen
    }

    /// A topological order (dependencies first), stable with respect to
    /// discovery order. Used for listings; the scheduler does not need it.
    pub fn run_order(&self) -> Vec<PathBuf> {
        let mut pending: Vec<usize> = self
            .modules
            .iter()
            .map(|m| m.dependencies.iter().filter(|d| self.index.contains_key(*d)).count())
            .collect();
        let mut queue: VecDeque<usize> = pending
            .iter()
            .enumerate()
            .filter(|(_, n)| **n == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.modules.len());

        while let Some(i) = queue.pop_front() {
            let path = &self.modules[i].path;
            order.push(path.clone());
            for (j, module) in self.modules.iter().enumerate() {
                if module.dependencies.contains(path) {
                    pending[j] -= 1;
                    if pending[j] == 0 {
                        queue.push_back(j);
                    }
                }
            }
        }
        order
    }
}

fn matches_any(patterns: &[Pattern], path: &Path) -> bool {
    patterns
        .iter()
        .any(|p| path.ancestors().any(|a| p.matches_path(a)))
}
