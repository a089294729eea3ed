//! Workflow and task definitions
//!
//! A [`WorkflowDefinition`] is the static plan: a set of tasks connected
//! by `depends_on` edges. Definitions arrive from YAML templates, inline
//! bus submissions, or the AI generator, and are validated once before
//! execution.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dag::DagError;
use crate::retry::RetryPolicy;

/// The kind of worker a task dispatches to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Graph/vector/document operation via the data worker
    Data,
    /// Prompt sent to the AI worker
    Ai,
    /// Container run via the execution worker
    Exec,
    /// Inline sub-tasks executed together
    Parallel,
    /// Boolean expression gating follow-up tasks
    Condition,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskType::Data => write!(f, "data"),
            TaskType::Ai => write!(f, "ai"),
            TaskType::Exec => write!(f, "exec"),
            TaskType::Parallel => write!(f, "parallel"),
            TaskType::Condition => write!(f, "condition"),
        }
    }
}

/// One unit of work inside a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,

    #[serde(rename = "type")]
    pub task_type: TaskType,

    /// Type-specific parameters; interpolated per attempt, never mutated
    #[serde(default)]
    pub parameters: Map<String, Value>,

    /// Ids of tasks that must complete first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Per-task timeout; 0 means the engine default
    #[serde(default)]
    pub timeout_seconds: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,

    /// Expression for `condition` tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Follow-up task ids when the condition holds
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_success: Vec<String>,

    /// Follow-up task ids when the condition does not hold
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_failure: Vec<String>,
}

impl TaskSpec {
    /// Minimal task with the given id and type
    pub fn new(id: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id: id.into(),
            task_type,
            parameters: Map::new(),
            depends_on: Vec::new(),
            timeout_seconds: 0,
            retry_policy: None,
            condition: None,
            on_success: Vec::new(),
            on_failure: Vec::new(),
        }
    }

    /// Set a parameter value
    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Add dependencies
    pub fn with_depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Attach a retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// The condition expression, whether declared as a field or a parameter
    pub fn condition_expression(&self) -> Option<&str> {
        self.condition
            .as_deref()
            .or_else(|| self.parameters.get("condition").and_then(Value::as_str))
    }

    /// Check type-specific required parameters
    pub fn validate(&self) -> Result<(), ValidationError> {
        let missing = |parameter: &'static str| ValidationError::MissingParameter {
            task: self.id.clone(),
            task_type: self.task_type,
            parameter,
        };

        match self.task_type {
            TaskType::Data => {
                if !has_string(&self.parameters, "operation") {
                    return Err(missing("operation"));
                }
            }
            TaskType::Ai => {
                if !has_string(&self.parameters, "prompt") {
                    return Err(missing("prompt"));
                }
            }
            TaskType::Exec => {
                if !has_string(&self.parameters, "image") {
                    return Err(missing("image"));
                }
            }
            TaskType::Parallel => {
                let tasks = self.parameters.get("tasks").and_then(Value::as_array);
                if tasks.map(Vec::is_empty).unwrap_or(true) {
                    return Err(missing("tasks"));
                }
            }
            TaskType::Condition => {
                if self.condition_expression().is_none() {
                    return Err(missing("condition"));
                }
            }
        }
        Ok(())
    }
}

/// The static plan for one workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whole-workflow deadline; 0 means the engine default
    #[serde(default)]
    pub timeout_seconds: u64,

    #[serde(default)]
    pub variables: Map<String, Value>,

    pub tasks: Vec<TaskSpec>,
}

impl WorkflowDefinition {
    /// Empty definition with the given id and name
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            timeout_seconds: 0,
            variables: Map::new(),
            tasks: Vec::new(),
        }
    }

    /// Add a task
    pub fn with_task(mut self, task: TaskSpec) -> Self {
        self.tasks.push(task);
        self
    }

    /// Set a workflow variable
    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// Look up a task by id
    pub fn task(&self, id: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Validate the whole plan: non-empty, unique ids, known dependency
    /// targets, and per-type required parameters
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.tasks.is_empty() {
            return Err(ValidationError::EmptyWorkflow);
        }

        let mut seen = std::collections::HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(ValidationError::DuplicateTask(task.id.clone()));
            }
        }

        for task in &self.tasks {
            for dep in &task.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(ValidationError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            task.validate()?;
        }

        Ok(())
    }
}

/// Why a definition was rejected
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    /// Definition contains no tasks
    #[error("workflow has no tasks")]
    EmptyWorkflow,

    /// Two tasks share an id
    #[error("duplicate task id: {0}")]
    DuplicateTask(String),

    /// A `depends_on` entry references a task that does not exist
    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    /// A type-specific required parameter is absent
    #[error("task {task} ({task_type}) is missing required parameter {parameter}")]
    MissingParameter {
        task: String,
        task_type: TaskType,
        parameter: &'static str,
    },

    /// The dependency graph is not a DAG
    #[error(transparent)]
    Dag(#[from] DagError),
}

fn has_string(params: &Map<String, Value>, key: &str) -> bool {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(|s| !s.is_empty())
        .unwrap_or(false)
}
