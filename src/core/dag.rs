//! Dependency graphs for workflow steps and run tasks.
//!
//! [`DependencyGraph`] wraps petgraph's `DiGraph`. Edges point from a
//! dependency to its dependent, so "downstream" means following outgoing
//! edges. Step graphs are keyed by step name, run graphs by task id.

use crate::core::task::{Task, TaskId};
use crate::core::workflow::{is_identifier, StepDefinition};
use crate::error::{Error, Result};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;

/// A directed graph of keys where an edge `a -> b` means `b` depends on `a`.
pub struct DependencyGraph<K> {
    graph: DiGraph<K, ()>,
    index: HashMap<K, NodeIndex>,
}

impl<K> DependencyGraph<K>
where
    K: Clone + Eq + Hash + Display,
{
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Add a node. Returns false if the key is already present.
    pub fn add_node(&mut self, key: K) -> bool {
        if self.index.contains_key(&key) {
            return false;
        }
        let node = self.graph.add_node(key.clone());
        self.index.insert(key, node);
        true
    }

    /// Record that `dependent` must wait for `dependency`.
    ///
    /// # Errors
    /// Returns a validation error if either key is unknown.
    pub fn add_dependency(&mut self, dependency: &K, dependent: &K) -> Result<()> {
        let from = self.node(dependency).ok_or_else(|| {
            Error::Validation(format!(
                "{} depends on undeclared {}",
                dependent, dependency
            ))
        })?;
        let to = self
            .node(dependent)
            .ok_or_else(|| Error::Validation(format!("{} is not declared", dependent)))?;
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
        Ok(())
    }

    fn node(&self, key: &K) -> Option<NodeIndex> {
        self.index.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Keys with no dependencies.
    pub fn roots(&self) -> Vec<&K> {
        self.graph
            .node_indices()
            .filter(|&n| {
                self.graph
                    .neighbors_directed(n, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .filter_map(|n| self.graph.node_weight(n))
            .collect()
    }

    /// Direct dependencies of `key`.
    pub fn dependencies(&self, key: &K) -> Vec<&K> {
        self.neighbors(key, Direction::Incoming)
    }

    /// Direct dependents of `key`.
    pub fn dependents(&self, key: &K) -> Vec<&K> {
        self.neighbors(key, Direction::Outgoing)
    }

    fn neighbors(&self, key: &K, direction: Direction) -> Vec<&K> {
        match self.node(key) {
            Some(node) => self
                .graph
                .neighbors_directed(node, direction)
                .filter_map(|n| self.graph.node_weight(n))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Keys in dependency order.
    ///
    /// # Errors
    /// Returns a validation error naming a key on a cycle.
    pub fn topological_order(&self) -> Result<Vec<&K>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let key = self
                .graph
                .node_weight(cycle.node_id())
                .map(|k| k.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            Error::Validation(format!("dependency cycle through {}", key))
        })?;
        Ok(sorted
            .into_iter()
            .filter_map(|n| self.graph.node_weight(n))
            .collect())
    }

    /// Every transitive dependent of `key`, in dependency order, excluding `key`.
    pub fn downstream(&self, key: &K) -> Result<Vec<&K>> {
        let Some(start) = self.node(key) else {
            return Ok(Vec::new());
        };

        let mut reachable = HashSet::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(node) = dfs.next(&self.graph) {
            if node != start {
                reachable.insert(node);
            }
        }

        let order = toposort(&self.graph, None)
            .map_err(|_| Error::Validation("dependency cycle".to_string()))?;
        Ok(order
            .into_iter()
            .filter(|n| reachable.contains(n))
            .filter_map(|n| self.graph.node_weight(n))
            .collect())
    }
}

impl<K> Default for DependencyGraph<K>
where
    K: Clone + Eq + Hash + Display,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> std::fmt::Debug for DependencyGraph<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("nodes", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .finish()
    }
}

impl DependencyGraph<TaskId> {
    /// Build the task graph of a run from its task rows.
    ///
    /// Dependencies pointing outside the given set are ignored.
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut graph = Self::new();
        for task in tasks {
            graph.add_node(task.id);
        }
        for task in tasks {
            for dependency in &task.dependencies {
                let _ = graph.add_dependency(dependency, &task.id);
            }
        }
        graph
    }
}

/// Validate a workflow's steps and return their dependency graph.
///
/// # Errors
/// Returns `Error::Validation` if there are no steps, a step name is
/// malformed or duplicated, an action is empty, a dependency names an
/// undeclared step, or the steps form a cycle.
pub fn validate_steps(steps: &[StepDefinition]) -> Result<DependencyGraph<String>> {
    if steps.is_empty() {
        return Err(Error::Validation(
            "workflow must declare at least one step".to_string(),
        ));
    }

    let mut graph = DependencyGraph::new();
    for step in steps {
        if !is_identifier(&step.name) {
            return Err(Error::Validation(format!(
                "invalid step name '{}'",
                step.name
            )));
        }
        if step.action.trim().is_empty() {
            return Err(Error::Validation(format!(
                "step '{}' has no action",
                step.name
            )));
        }
        if !graph.add_node(step.name.clone()) {
            return Err(Error::Validation(format!(
                "duplicate step name '{}'",
                step.name
            )));
        }
    }

    for step in steps {
        for dependency in &step.depends_on {
            graph.add_dependency(dependency, &step.name)?;
        }
    }

    graph.topological_order()?;
    Ok(graph)
}
