//! Workflow executor
//!
//! Runs a workflow to completion: builds the DAG, walks its batches with
//! a global concurrency cap, interpolates variables per attempt, applies
//! retry policies, and persists the execution after every batch. A
//! failed save mid-run is logged and execution continues; the final save
//! is retried a bounded number of times.
//!
//! Ownership: the executor is the single writer of an execution record
//! while the run is live. The recovery manager only touches executions
//! with no live owner.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use conductor_core::interpolate::{self, Scope};
use conductor_core::{
    Status, TaskDag, TaskSpec, TaskState, WorkflowDefinition, WorkflowExecution,
};
use conductor_storage::ExecutionStore;

use crate::task::TaskExecutor;

/// Executor configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Global cap on concurrently running tasks
    pub max_concurrent: usize,

    /// Deadline for workflows that declare none
    pub default_workflow_timeout: Duration,

    /// How many times the terminal save is retried
    pub final_save_retries: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            default_workflow_timeout: Duration::from_secs(60 * 60),
            final_save_retries: 3,
        }
    }
}

impl ExecutorConfig {
    /// Set the concurrency cap
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    /// Set the fallback workflow deadline
    pub fn with_default_workflow_timeout(mut self, timeout: Duration) -> Self {
        self.default_workflow_timeout = timeout;
        self
    }
}

/// How a run ended before the terminal status was applied
enum RunError {
    /// At least one task failed terminally; batches stopped
    TasksFailed(String),
    /// The workflow deadline expired
    TimedOut,
    /// Orchestrator shutdown cancelled the run
    Cancelled,
}

/// Drives workflows through their DAG batches
pub struct WorkflowExecutor {
    store: Arc<dyn ExecutionStore>,
    tasks: Arc<TaskExecutor>,
    config: ExecutorConfig,
    semaphore: Arc<Semaphore>,
    shutdown_rx: watch::Receiver<bool>,
}

impl WorkflowExecutor {
    /// Create an executor
    ///
    /// The semaphore is shared across every workflow this executor runs,
    /// so `max_concurrent` caps the whole process, not one workflow.
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        tasks: Arc<TaskExecutor>,
        config: ExecutorConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            store,
            tasks,
            config,
            semaphore,
            shutdown_rx,
        }
    }

    /// Run a workflow to completion and return the terminal execution
    ///
    /// Never panics across this boundary: validation failures, task
    /// failures, timeouts, and cancellation all come back as a terminal
    /// execution record.
    #[instrument(skip_all, fields(workflow_id = %workflow.id))]
    pub async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        request_variables: Map<String, Value>,
        correlation_id: Option<String>,
    ) -> WorkflowExecution {
        let mut execution = WorkflowExecution::new(workflow, request_variables, correlation_id);
        info!(execution_id = %execution.id, tasks = workflow.tasks.len(), "workflow started");

        let dag = match workflow
            .validate()
            .map_err(|e| e.to_string())
            .and_then(|()| TaskDag::build(&workflow.tasks).map_err(|e| e.to_string()))
        {
            Ok(dag) => dag,
            Err(reason) => {
                warn!(execution_id = %execution.id, %reason, "workflow rejected");
                execution.mark_failed(reason);
                self.save_final(&execution).await;
                return execution;
            }
        };

        self.save_midrun(&execution).await;

        let timeout = if workflow.timeout_seconds == 0 {
            self.config.default_workflow_timeout
        } else {
            Duration::from_secs(workflow.timeout_seconds)
        };
        let deadline = tokio::time::Instant::now() + timeout;

        match self.run_batches(&mut execution, workflow, &dag, deadline).await {
            Ok(()) => {
                execution.mark_completed();
                info!(execution_id = %execution.id, "workflow completed");
            }
            Err(RunError::TasksFailed(reason)) => {
                warn!(execution_id = %execution.id, %reason, "workflow failed");
                execution.mark_failed(reason);
            }
            Err(RunError::TimedOut) => {
                warn!(execution_id = %execution.id, ?timeout, "workflow timeout");
                execution.mark_failed(format!("workflow timeout after {}s", timeout.as_secs()));
            }
            Err(RunError::Cancelled) => {
                warn!(execution_id = %execution.id, "workflow cancelled");
                execution.mark_cancelled("execution cancelled by shutdown");
            }
        }

        self.save_final(&execution).await;
        execution
    }

    /// Walk the DAG batches; batch `k+1` never starts until all of
    /// batch `k` has terminated
    async fn run_batches(
        &self,
        execution: &mut WorkflowExecution,
        workflow: &WorkflowDefinition,
        dag: &TaskDag,
        deadline: tokio::time::Instant,
    ) -> Result<(), RunError> {
        let mut shutdown_rx = self.shutdown_rx.clone();

        for batch in dag.batches() {
            let mut join_set: JoinSet<TaskState> = JoinSet::new();

            for task_id in batch {
                let Some(spec) = workflow.task(task_id) else {
                    continue;
                };

                if let Some(reason) = skip_reason(spec, execution, workflow) {
                    debug!(execution_id = %execution.id, task_id, %reason, "task skipped");
                    if let Some(state) = execution.task_states.get_mut(task_id) {
                        state.mark_skipped(reason);
                        self.checkpoint(&execution.id, state).await;
                    }
                    continue;
                }

                // Mark running in the shared record first, so a deadline
                // expiry can fail exactly the tasks that were in flight
                let state = match execution.task_states.get_mut(task_id) {
                    Some(state) => {
                        state.mark_running();
                        state.clone()
                    }
                    None => continue,
                };

                let worker = TaskWorker {
                    tasks: Arc::clone(&self.tasks),
                    store: Arc::clone(&self.store),
                    execution_id: execution.id.clone(),
                    spec: spec.clone(),
                    variables: execution.variables.clone(),
                    outputs: execution.completed_outputs(),
                    shutdown_rx: self.shutdown_rx.clone(),
                };
                let semaphore = Arc::clone(&self.semaphore);

                join_set.spawn(async move {
                    match semaphore.acquire_owned().await {
                        Ok(_permit) => worker.run(state).await,
                        Err(_) => {
                            let mut state = state;
                            state.mark_failed("scheduler shut down before start");
                            state
                        }
                    }
                });
            }

            let mut failures: Vec<String> = Vec::new();
            loop {
                let joined = tokio::select! {
                    joined = join_set.join_next() => joined,
                    _ = shutdown_rx.changed() => {
                        join_set.abort_all();
                        fail_active_tasks(execution, "execution cancelled");
                        return Err(RunError::Cancelled);
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        join_set.abort_all();
                        fail_active_tasks(execution, "workflow timeout");
                        return Err(RunError::TimedOut);
                    }
                };

                match joined {
                    None => break,
                    Some(Ok(state)) => {
                        if state.status == Status::Failed {
                            failures.push(format!(
                                "task {}: {}",
                                state.id,
                                state.error.as_deref().unwrap_or("unknown error")
                            ));
                        }
                        execution.task_states.insert(state.id.clone(), state);
                    }
                    Some(Err(join_error)) => {
                        // A worker panicked or was aborted under us;
                        // surfaced as a batch failure, never propagated
                        error!(execution_id = %execution.id, %join_error, "task worker died");
                        failures.push(format!("task worker died: {join_error}"));
                    }
                }
            }

            self.save_midrun(execution).await;

            if !failures.is_empty() {
                return Err(RunError::TasksFailed(failures.join("; ")));
            }
        }

        Ok(())
    }

    /// Best-effort mid-run save: log and continue
    async fn save_midrun(&self, execution: &WorkflowExecution) {
        if let Err(e) = self.store.save(execution).await {
            warn!(execution_id = %execution.id, error = %e, "mid-run save failed, continuing");
        }
    }

    /// Terminal save, retried a bounded number of times
    async fn save_final(&self, execution: &WorkflowExecution) {
        for attempt in 0..=self.config.final_save_retries {
            match self.store.save(execution).await {
                Ok(()) => return,
                Err(e) if attempt < self.config.final_save_retries => {
                    warn!(
                        execution_id = %execution.id,
                        attempt,
                        error = %e,
                        "final save failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(100 * (attempt as u64 + 1))).await;
                }
                Err(e) => {
                    error!(execution_id = %execution.id, error = %e, "final save abandoned");
                }
            }
        }
    }

    async fn checkpoint(&self, execution_id: &str, state: &TaskState) {
        if let Err(e) = self.store.save_checkpoint(execution_id, &state.id, state).await {
            warn!(execution_id, task_id = %state.id, error = %e, "checkpoint save failed");
        }
    }
}

/// One task attempt loop, run inside its own spawned worker
struct TaskWorker {
    tasks: Arc<TaskExecutor>,
    store: Arc<dyn ExecutionStore>,
    execution_id: String,
    spec: TaskSpec,
    variables: Map<String, Value>,
    outputs: Map<String, Value>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskWorker {
    async fn run(self, mut state: TaskState) -> TaskState {
        self.checkpoint(&state).await;
        let scope = Scope::with_outputs(&self.variables, &self.outputs);

        loop {
            // Fresh deep copy per attempt; the spec is never mutated
            let parameters = interpolate::interpolate_parameters(&self.spec.parameters, &scope);

            match self.tasks.execute(&self.spec, &parameters, &scope).await {
                Ok(output) => {
                    state.mark_completed(output);
                    break;
                }
                Err(e) => {
                    let retry = self
                        .spec
                        .retry_policy
                        .as_ref()
                        .filter(|policy| e.is_retryable() && policy.allows_retry(state.retry_count));

                    let Some(policy) = retry else {
                        state.mark_failed(e.to_string());
                        break;
                    };

                    state.retry_count += 1;
                    state.status = Status::Retrying;
                    state.error = Some(e.to_string());
                    self.checkpoint(&state).await;

                    let delay = policy.delay_for_attempt(state.retry_count);
                    warn!(
                        execution_id = %self.execution_id,
                        task_id = %self.spec.id,
                        retry = state.retry_count,
                        ?delay,
                        error = %e,
                        "task failed, backing off before retry"
                    );

                    let mut shutdown_rx = self.shutdown_rx.clone();
                    let cancelled = tokio::select! {
                        _ = tokio::time::sleep(delay) => false,
                        _ = shutdown_rx.changed() => true,
                    };
                    if cancelled {
                        state.mark_failed("cancelled during retry backoff");
                        break;
                    }

                    state.status = Status::Running;
                    state.error = None;
                }
            }
        }

        self.checkpoint(&state).await;
        state
    }

    async fn checkpoint(&self, state: &TaskState) {
        if let Err(e) = self
            .store
            .save_checkpoint(&self.execution_id, &state.id, state)
            .await
        {
            warn!(
                execution_id = %self.execution_id,
                task_id = %state.id,
                error = %e,
                "checkpoint save failed"
            );
        }
    }
}

/// Decide whether a task must be skipped instead of run
///
/// A task is skipped when any dependency was skipped, or when a
/// condition-task dependency gates it (the task is named in the
/// condition's `on_success`/`on_failure` lists but absent from the
/// selected follow-up set).
fn skip_reason(
    spec: &TaskSpec,
    execution: &WorkflowExecution,
    workflow: &WorkflowDefinition,
) -> Option<String> {
    for dep in &spec.depends_on {
        let dep_state = execution.task_states.get(dep)?;

        if dep_state.status == Status::Skipped {
            return Some(format!("dependency {dep} was skipped"));
        }

        if dep_state.status == Status::Completed {
            let Some(dep_spec) = workflow.task(dep) else {
                continue;
            };
            let gated = dep_spec.on_success.contains(&spec.id)
                || dep_spec.on_failure.contains(&spec.id);
            if !gated {
                continue;
            }

            let selected = dep_state
                .output
                .get("follow_up_tasks")
                .and_then(Value::as_array)
                .map(|ids| ids.iter().any(|id| id.as_str() == Some(spec.id.as_str())))
                .unwrap_or(true);
            if !selected {
                return Some(format!("not selected by condition task {dep}"));
            }
        }
    }
    None
}

/// Fail every running/retrying task with the given reason
fn fail_active_tasks(execution: &mut WorkflowExecution, reason: &str) {
    for state in execution.task_states.values_mut() {
        if state.status.is_active() {
            state.mark_failed(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::TaskType;
    use serde_json::json;

    fn condition_workflow() -> WorkflowDefinition {
        let mut gate = TaskSpec::new("gate", TaskType::Condition);
        gate.condition = Some("${go} == 'yes'".to_string());
        gate.on_success = vec!["happy".to_string()];
        gate.on_failure = vec!["sad".to_string()];

        WorkflowDefinition::new("w", "w")
            .with_task(gate)
            .with_task(
                TaskSpec::new("happy", TaskType::Data)
                    .with_parameter("operation", json!("q"))
                    .with_depends_on(["gate"]),
            )
            .with_task(
                TaskSpec::new("sad", TaskType::Data)
                    .with_parameter("operation", json!("q"))
                    .with_depends_on(["gate"]),
            )
            .with_task(
                TaskSpec::new("cleanup", TaskType::Data)
                    .with_parameter("operation", json!("q"))
                    .with_depends_on(["gate"]),
            )
    }

    fn execution_with_gate_output(
        workflow: &WorkflowDefinition,
        follow_ups: Value,
    ) -> WorkflowExecution {
        let mut execution = WorkflowExecution::new(workflow, Map::new(), None);
        let gate = execution.task_states.get_mut("gate").unwrap();
        let mut output = Map::new();
        output.insert("condition_result".to_string(), json!(true));
        output.insert("follow_up_tasks".to_string(), follow_ups);
        gate.mark_completed(output);
        execution
    }

    #[test]
    fn test_skip_reason_gates_unselected_branch() {
        let workflow = condition_workflow();
        let execution = execution_with_gate_output(&workflow, json!(["happy"]));

        let happy = workflow.task("happy").unwrap();
        let sad = workflow.task("sad").unwrap();
        let cleanup = workflow.task("cleanup").unwrap();

        assert!(skip_reason(happy, &execution, &workflow).is_none());
        assert!(skip_reason(sad, &execution, &workflow)
            .expect("sad branch should skip")
            .contains("gate"));
        // cleanup is not named by the condition lists at all: ungated
        assert!(skip_reason(cleanup, &execution, &workflow).is_none());
    }

    #[test]
    fn test_skip_reason_cascades_through_skipped_deps() {
        let workflow = condition_workflow();
        let mut execution = execution_with_gate_output(&workflow, json!(["happy"]));
        execution
            .task_states
            .get_mut("sad")
            .unwrap()
            .mark_skipped("not selected");

        let mut downstream = TaskSpec::new("after-sad", TaskType::Data);
        downstream.depends_on = vec!["sad".to_string()];

        let reason = skip_reason(&downstream, &execution, &workflow)
            .expect("dependent of skipped task should skip");
        assert!(reason.contains("sad"));
    }

    #[test]
    fn test_fail_active_tasks_touches_only_active() {
        let workflow = condition_workflow();
        let mut execution = WorkflowExecution::new(&workflow, Map::new(), None);
        execution.task_states.get_mut("gate").unwrap().mark_running();
        execution
            .task_states
            .get_mut("happy")
            .unwrap()
            .mark_completed(Map::new());

        fail_active_tasks(&mut execution, "workflow timeout");

        assert_eq!(
            execution.task_states["gate"].status,
            Status::Failed
        );
        assert_eq!(
            execution.task_states["gate"].error.as_deref(),
            Some("workflow timeout")
        );
        assert_eq!(execution.task_states["happy"].status, Status::Completed);
        assert_eq!(execution.task_states["sad"].status, Status::Pending);
    }
}
