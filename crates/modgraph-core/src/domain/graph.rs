//! Dependency graph analysis over a module set
//!
//! Missing targets and self references are integrity warnings, never errors.
//! Cycles only fail `resolve`; the rest of the analysis still works on a
//! cyclic graph.

use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use thiserror::Error;

use super::module::{ModuleName, ModuleSet, ModuleStatus};

/// Non-fatal integrity problem in a module set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityWarning {
    /// A module lists itself as a dependency
    SelfReference {
        /// The module
        module: ModuleName,
    },
    /// A module depends on a name that is not in the set
    MissingDependency {
        /// The depending module
        module: ModuleName,
        /// The missing target
        dependency: ModuleName,
    },
}

impl fmt::Display for IntegrityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityWarning::SelfReference { module } => {
                write!(f, "Module '{}' depends on itself", module)
            }
            IntegrityWarning::MissingDependency { module, dependency } => write!(
                f,
                "Module '{}' depends on '{}' which was not found",
                module, dependency
            ),
        }
    }
}

/// Circular dependency found while resolving
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Circular dependency detected: {}", format_cycle(.cycle))]
pub struct CycleError {
    /// Names along the cycle; the first name is repeated at the end
    pub cycle: Vec<ModuleName>,
}

fn format_cycle(cycle: &[ModuleName]) -> String {
    cycle
        .iter()
        .map(ModuleName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Summary counts for a module set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleStatistics {
    /// Number of modules
    pub total_modules: usize,
    /// Module count per status
    pub by_status: HashMap<ModuleStatus, usize>,
    /// Sum of dependency list lengths
    pub dependency_count: usize,
}

impl ModuleStatistics {
    /// Compute statistics for a set
    pub fn compute(modules: &ModuleSet) -> Self {
        let mut stats = ModuleStatistics {
            total_modules: modules.len(),
            ..Default::default()
        };
        for module in modules.iter() {
            *stats.by_status.entry(module.status).or_insert(0) += 1;
            stats.dependency_count += module.dependencies.len();
        }
        stats
    }

    /// Module count for one status
    pub fn count(&self, status: ModuleStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Adjacency view of a module set
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    order: Vec<ModuleName>,
    dependencies: HashMap<ModuleName, Vec<ModuleName>>,
    dependents: HashMap<ModuleName, Vec<ModuleName>>,
    warnings: Vec<IntegrityWarning>,
}

impl DependencyGraph {
    /// Build the graph from a module set
    pub fn build(modules: &ModuleSet) -> Self {
        let order: Vec<ModuleName> = modules.names().cloned().collect();
        let mut dependencies = HashMap::with_capacity(order.len());
        let mut dependents: HashMap<ModuleName, Vec<ModuleName>> =
            order.iter().map(|name| (name.clone(), Vec::new())).collect();
        let mut warnings = Vec::new();

        for module in modules.iter() {
            let mut existing = Vec::new();
            for dep in &module.dependencies {
                if dep == &module.name {
                    warnings.push(IntegrityWarning::SelfReference {
                        module: module.name.clone(),
                    });
                    continue;
                }
                match dependents.get_mut(dep) {
                    Some(list) => {
                        list.push(module.name.clone());
                        existing.push(dep.clone());
                    }
                    None => warnings.push(IntegrityWarning::MissingDependency {
                        module: module.name.clone(),
                        dependency: dep.clone(),
                    }),
                }
            }
            dependencies.insert(module.name.clone(), existing);
        }

        Self {
            order,
            dependencies,
            dependents,
            warnings,
        }
    }

    /// Integrity warnings found while building
    pub fn integrity_warnings(&self) -> &[IntegrityWarning] {
        &self.warnings
    }

    /// Modules that depend on `name`
    pub fn dependents(&self, name: &str) -> &[ModuleName] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Existing dependencies of `name`; self references and missing targets are excluded
    pub fn dependencies(&self, name: &str) -> &[ModuleName] {
        self.dependencies.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Topological order with dependencies before their dependents.
    ///
    /// Ties are broken by definition order.
    pub fn resolve(&self) -> Result<Vec<ModuleName>, CycleError> {
        let resolved = self.kahn_order();
        if resolved.len() == self.order.len() {
            return Ok(resolved);
        }

        let done: HashSet<&ModuleName> = resolved.iter().collect();
        let remaining: Vec<&ModuleName> =
            self.order.iter().filter(|name| !done.contains(name)).collect();
        Err(CycleError {
            cycle: self.find_cycle(&remaining),
        })
    }

    fn find_cycle(&self, remaining: &[&ModuleName]) -> Vec<ModuleName> {
        let remaining_set: HashSet<&ModuleName> = remaining.iter().copied().collect();
        let mut visited: HashSet<&ModuleName> = HashSet::new();

        for &start in remaining {
            if visited.contains(start) {
                continue;
            }
            // Iterative DFS; `path` mirrors the recursion stack.
            let mut path: Vec<&ModuleName> = vec![start];
            let mut next_child: Vec<usize> = vec![0];
            visited.insert(start);

            while let Some(&node) = path.last() {
                let children = self.dependencies(node.as_str());
                let idx = next_child.last().copied().unwrap_or(0);
                if idx >= children.len() {
                    path.pop();
                    next_child.pop();
                    continue;
                }
                if let Some(last) = next_child.last_mut() {
                    *last += 1;
                }
                let child = &children[idx];
                if !remaining_set.contains(child) {
                    continue;
                }
                if let Some(pos) = path.iter().position(|n| *n == child) {
                    let mut cycle: Vec<ModuleName> =
                        path[pos..].iter().map(|n| (*n).clone()).collect();
                    cycle.push(child.clone());
                    return cycle;
                }
                if visited.insert(child) {
                    path.push(child);
                    next_child.push(0);
                }
            }
        }

        remaining.iter().map(|n| (*n).clone()).collect()
    }

    /// Layout level per module: 0 without dependencies, else one more than the deepest dependency.
    ///
    /// Modules on or behind a cycle get no level.
    pub fn levels(&self) -> HashMap<ModuleName, usize> {
        let mut levels: HashMap<ModuleName, usize> = HashMap::new();
        let order = match self.resolve() {
            Ok(order) => order,
            Err(_) => self.kahn_order(),
        };
        for name in order {
            let level = self
                .dependencies(name.as_str())
                .iter()
                .filter_map(|dep| levels.get(dep))
                .max()
                .map_or(0, |max| max + 1);
            levels.insert(name, level);
        }
        levels
    }

    // Kahn's algorithm; stops short of every module on or behind a cycle.
    fn kahn_order(&self) -> Vec<ModuleName> {
        let mut in_degree: HashMap<&ModuleName, usize> = self
            .order
            .iter()
            .map(|name| (name, self.dependencies(name.as_str()).len()))
            .collect();
        let mut queue: VecDeque<&ModuleName> = self
            .order
            .iter()
            .filter(|name| in_degree.get(name) == Some(&0))
            .collect();
        let mut out = Vec::new();
        while let Some(current) = queue.pop_front() {
            out.push(current.clone());
            for dependent in self.dependents(current.as_str()) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::module::Module;
    use pretty_assertions::assert_eq;

    fn set(defs: &[(&str, &[&str])]) -> ModuleSet {
        defs.iter()
            .map(|(name, deps)| {
                Module::new(*name, "test module", ModuleStatus::Placeholder)
                    .with_dependencies(deps.iter().copied())
            })
            .collect()
    }

    fn names(list: &[ModuleName]) -> Vec<&str> {
        list.iter().map(ModuleName::as_str).collect()
    }

    #[test]
    fn test_resolve_orders_dependencies_first() {
        let graph = DependencyGraph::build(&set(&[
            ("Api", &["Auth", "Db"]),
            ("Auth", &["Db"]),
            ("Db", &[]),
        ]));
        let order = graph.resolve().unwrap();
        assert_eq!(names(&order), vec!["Db", "Auth", "Api"]);
        assert_eq!(names(graph.dependents("Db")), vec!["Api", "Auth"]);
    }

    #[test]
    fn test_levels() {
        let graph = DependencyGraph::build(&set(&[
            ("Api", &["Auth"]),
            ("Auth", &["Db"]),
            ("Db", &[]),
            ("Cli", &["Missing"]),
        ]));
        let levels = graph.levels();
        assert_eq!(levels[&ModuleName::from("Db")], 0);
        assert_eq!(levels[&ModuleName::from("Auth")], 1);
        assert_eq!(levels[&ModuleName::from("Api")], 2);
        assert_eq!(levels[&ModuleName::from("Cli")], 0);
    }

    #[test]
    fn test_cycle_detected() {
        let graph = DependencyGraph::build(&set(&[
            ("A", &["B"]),
            ("B", &["C"]),
            ("C", &["A"]),
            ("D", &[]),
        ]));
        let err = graph.resolve().unwrap_err();
        assert_eq!(names(&err.cycle), vec!["A", "B", "C", "A"]);
        assert_eq!(err.to_string(), "Circular dependency detected: A -> B -> C -> A");

        let levels = graph.levels();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[&ModuleName::from("D")], 0);
    }

    #[test]
    fn test_integrity_warnings_are_not_errors() {
        let graph = DependencyGraph::build(&set(&[("A", &["A", "Ghost"]), ("B", &["A"])]));
        assert_eq!(
            graph.integrity_warnings(),
            &[
                IntegrityWarning::SelfReference { module: "A".into() },
                IntegrityWarning::MissingDependency {
                    module: "A".into(),
                    dependency: "Ghost".into(),
                },
            ]
        );
        assert_eq!(names(&graph.resolve().unwrap()), vec!["A", "B"]);
    }

    #[test]
    fn test_statistics() {
        let mut modules = set(&[("A", &["B"]), ("B", &[])]);
        let mut a = modules.get("A").unwrap().clone();
        a.status = ModuleStatus::Implemented;
        modules.insert(a);

        let stats = ModuleStatistics::compute(&modules);
        assert_eq!(stats.total_modules, 2);
        assert_eq!(stats.count(ModuleStatus::Implemented), 1);
        assert_eq!(stats.count(ModuleStatus::Placeholder), 1);
        assert_eq!(stats.count(ModuleStatus::Error), 0);
        assert_eq!(stats.dependency_count, 1);
    }
}
