//! Dependency graph validation and batching
//!
//! [`TaskDag::build`] turns a task list into a layered topological order:
//! batch `k` holds every task whose dependencies all live in batches
//! `< k`. Batches are the scheduler's parallel units; within a batch the
//! order is lexicographic so repeated runs schedule identically.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::TaskSpec;

/// Why the task list is not a usable DAG
#[derive(Debug, Clone, thiserror::Error)]
pub enum DagError {
    /// No tasks at all
    #[error("workflow has no tasks")]
    Empty,

    /// Two tasks share an id
    #[error("duplicate task id: {0}")]
    DuplicateTask(String),

    /// An edge points at a task that does not exist
    #[error("task {task} depends on unknown task {dependency}")]
    MissingDependency { task: String, dependency: String },

    /// The graph contains a cycle through the listed tasks
    #[error("dependency cycle involving tasks: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// A validated task graph with its parallel batches
#[derive(Debug, Clone)]
pub struct TaskDag {
    order: Vec<String>,
    batches: Vec<Vec<String>>,
}

impl TaskDag {
    /// Validate the dependency edges and compute the layered partition
    ///
    /// Fails on empty input, duplicate ids, missing dependency targets,
    /// and cycles. No partial DAG is ever returned.
    pub fn build(tasks: &[TaskSpec]) -> Result<Self, DagError> {
        if tasks.is_empty() {
            return Err(DagError::Empty);
        }

        let mut dependencies: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for task in tasks {
            if dependencies
                .insert(task.id.as_str(), BTreeSet::new())
                .is_some()
            {
                return Err(DagError::DuplicateTask(task.id.clone()));
            }
        }

        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for task in tasks {
            for dep in &task.depends_on {
                if !dependencies.contains_key(dep.as_str()) {
                    return Err(DagError::MissingDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
                if let Some(deps) = dependencies.get_mut(task.id.as_str()) {
                    deps.insert(dep.as_str());
                }
                dependents.entry(dep.as_str()).or_default().push(&task.id);
            }
        }

        // Kahn's algorithm, one layer at a time. BTreeMap iteration keeps
        // each batch lexicographic without an explicit sort.
        let mut order = Vec::with_capacity(tasks.len());
        let mut batches = Vec::new();
        let mut remaining = dependencies;

        while !remaining.is_empty() {
            let ready: Vec<&str> = remaining
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(id, _)| *id)
                .collect();

            if ready.is_empty() {
                let stuck: Vec<String> = remaining.keys().map(|id| id.to_string()).collect();
                return Err(DagError::Cycle(stuck));
            }

            for id in &ready {
                remaining.remove(id);
                if let Some(children) = dependents.get(id) {
                    for child in children {
                        if let Some(deps) = remaining.get_mut(child) {
                            deps.remove(id);
                        }
                    }
                }
            }

            order.extend(ready.iter().map(|id| id.to_string()));
            batches.push(ready.into_iter().map(String::from).collect());
        }

        Ok(Self { order, batches })
    }

    /// Full topological order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// The layered partition driving parallel execution
    pub fn batches(&self) -> &[Vec<String>] {
        &self.batches
    }

    /// Number of tasks in the graph
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the graph has no tasks (never true for a built DAG)
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
