//! Running workflow instances
//!
//! A [`WorkflowExecution`] is the persisted snapshot of one run: overall
//! status, the merged variable map, and a [`TaskState`] per task. The
//! executor owns the record while the run is live; the recovery manager
//! takes over only when no executor does.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::model::WorkflowDefinition;

/// Lifecycle state shared by executions and tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Created, not yet started
    Pending,
    /// Actively executing
    Running,
    /// Failed at least once, waiting out the backoff delay
    Retrying,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Stopped before finishing
    Cancelled,
    /// Never ran because a dependency ruled it out
    Skipped,
}

impl Status {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Completed | Status::Failed | Status::Cancelled | Status::Skipped
        )
    }

    /// Active states keep the execution in the recovery index
    pub fn is_active(&self) -> bool {
        matches!(self, Status::Running | Status::Retrying)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Pending => write!(f, "pending"),
            Status::Running => write!(f, "running"),
            Status::Retrying => write!(f, "retrying"),
            Status::Completed => write!(f, "completed"),
            Status::Failed => write!(f, "failed"),
            Status::Cancelled => write!(f, "cancelled"),
            Status::Skipped => write!(f, "skipped"),
        }
    }
}

/// Per-task progress inside an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub id: String,
    pub status: Status,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl TaskState {
    /// Fresh pending state for the given task id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: Status::Pending,
            retry_count: 0,
            start_time: None,
            end_time: None,
            output: Map::new(),
            error: None,
            metadata: Map::new(),
        }
    }

    /// Mark the task running as of now
    pub fn mark_running(&mut self) {
        self.status = Status::Running;
        self.start_time = Some(Utc::now());
        self.end_time = None;
        self.error = None;
    }

    /// Mark the task completed with its output
    pub fn mark_completed(&mut self, output: Map<String, Value>) {
        self.status = Status::Completed;
        self.end_time = Some(Utc::now());
        self.output = output;
        self.error = None;
    }

    /// Mark the task terminally failed
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = Status::Failed;
        self.end_time = Some(Utc::now());
        self.error = Some(error.into());
    }

    /// Mark the task skipped with a reason
    pub fn mark_skipped(&mut self, reason: impl Into<String>) {
        self.status = Status::Skipped;
        self.end_time = Some(Utc::now());
        self.metadata
            .insert("skip_reason".to_string(), Value::String(reason.into()));
    }

    /// Put the task back to pending, as if it never started
    ///
    /// Used by recovery when no usable checkpoint exists. Retry count is
    /// preserved so a flapping task still exhausts its policy.
    pub fn reset_to_pending(&mut self) {
        self.status = Status::Pending;
        self.start_time = None;
        self.end_time = None;
        self.error = None;
    }
}

/// One run of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub status: Status,
    #[serde(default)]
    pub variables: Map<String, Value>,
    pub task_states: BTreeMap<String, TaskState>,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowExecution {
    /// Create a running execution for the given definition
    ///
    /// Request variables override workflow variables on key collisions.
    /// Every task gets a pending [`TaskState`].
    pub fn new(
        workflow: &WorkflowDefinition,
        request_variables: Map<String, Value>,
        correlation_id: Option<String>,
    ) -> Self {
        let mut variables = workflow.variables.clone();
        variables.extend(request_variables);

        let task_states = workflow
            .tasks
            .iter()
            .map(|task| (task.id.clone(), TaskState::new(&task.id)))
            .collect();

        Self {
            id: Uuid::now_v7().to_string(),
            workflow_id: workflow.id.clone(),
            correlation_id,
            status: Status::Running,
            variables,
            task_states,
            start_time: Utc::now(),
            end_time: None,
            error: None,
        }
    }

    /// Finish the run successfully
    pub fn mark_completed(&mut self) {
        self.status = Status::Completed;
        self.end_time = Some(Utc::now());
    }

    /// Finish the run with an error
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = Status::Failed;
        self.end_time = Some(Utc::now());
        self.error = Some(error.into());
    }

    /// Finish the run as cancelled
    pub fn mark_cancelled(&mut self, error: impl Into<String>) {
        self.status = Status::Cancelled;
        self.end_time = Some(Utc::now());
        self.error = Some(error.into());
    }

    /// Ids of tasks currently running or retrying
    pub fn active_task_ids(&self) -> Vec<String> {
        self.task_states
            .values()
            .filter(|state| state.status.is_active())
            .map(|state| state.id.clone())
            .collect()
    }

    /// Most recent task activity timestamp, if any task ever started
    pub fn last_task_activity(&self) -> Option<DateTime<Utc>> {
        self.task_states
            .values()
            .flat_map(|state| [state.start_time, state.end_time])
            .flatten()
            .max()
    }

    /// Outputs of completed tasks, keyed by task id
    pub fn completed_outputs(&self) -> Map<String, Value> {
        self.task_states
            .values()
            .filter(|state| state.status == Status::Completed)
            .map(|state| (state.id.clone(), Value::Object(state.output.clone())))
            .collect()
    }
}
