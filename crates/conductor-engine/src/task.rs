//! Single-task dispatch
//!
//! The [`TaskExecutor`] turns one (already interpolated) task into the
//! right worker request and hands the response body back as the task's
//! output. It knows nothing about batches, retries, or persistence —
//! the workflow executor owns those.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};

use conductor_bus::{CorrelationCoordinator, CorrelationError};
use conductor_contracts::{
    AiRequest, ContainerSpec, DataRequest, ExecInput, ExecOutput, ExecRequest, ServiceKind,
    ServiceResponse,
};
use conductor_core::interpolate::Scope;
use conductor_core::{condition, TaskSpec, TaskType, ValidationError};

/// Error type for task dispatch
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The task is malformed; retrying cannot help
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A parameter had the wrong shape
    #[error("task parameter error: {0}")]
    Parameter(String),

    /// The worker answered with success=false
    #[error("worker error: {0}")]
    Worker(String),

    /// Transport, timeout, or shutdown underneath the call
    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    /// One or more parallel sub-tasks failed
    #[error("parallel sub-tasks failed: {0}")]
    Parallel(String),
}

impl TaskError {
    /// Whether the retry policy may re-attempt after this error
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TaskError::Validation(_) | TaskError::Parameter(_))
    }
}

/// Task executor configuration
#[derive(Debug, Clone)]
pub struct TaskExecutorConfig {
    /// Applied when a task declares no timeout
    pub default_task_timeout: Duration,
}

impl Default for TaskExecutorConfig {
    fn default() -> Self {
        Self {
            default_task_timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Dispatches one task to its worker through the coordinator
pub struct TaskExecutor {
    coordinator: Arc<CorrelationCoordinator>,
    config: TaskExecutorConfig,
}

impl TaskExecutor {
    /// Create a task executor over the given coordinator
    pub fn new(coordinator: Arc<CorrelationCoordinator>, config: TaskExecutorConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// Execute one task and return its output map
    ///
    /// `parameters` must already be interpolated; `scope` carries the
    /// same variables and upstream outputs for condition evaluation and
    /// exec input mappings.
    #[instrument(skip_all, fields(task_id = %task.id, task_type = %task.task_type))]
    pub async fn execute(
        &self,
        task: &TaskSpec,
        parameters: &Map<String, Value>,
        scope: &Scope<'_>,
    ) -> Result<Map<String, Value>, TaskError> {
        task.validate()?;
        let timeout = self.task_timeout(task);

        match task.task_type {
            TaskType::Data => self.execute_data(parameters, timeout).await,
            TaskType::Ai => self.execute_ai(parameters, timeout).await,
            TaskType::Exec => self.execute_exec(parameters, scope, timeout).await,
            TaskType::Parallel => self.execute_parallel(parameters, scope).await,
            TaskType::Condition => Ok(execute_condition(task, scope)),
        }
    }

    fn task_timeout(&self, task: &TaskSpec) -> Duration {
        if task.timeout_seconds == 0 {
            self.config.default_task_timeout
        } else {
            Duration::from_secs(task.timeout_seconds)
        }
    }

    async fn execute_data(
        &self,
        parameters: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<Map<String, Value>, TaskError> {
        let operation = required_str(parameters, "operation")?;
        let mut params = parameters.clone();
        params.remove("operation");

        let request = DataRequest {
            correlation_id: String::new(),
            operation,
            params,
        };

        let response = self
            .coordinator
            .call(ServiceKind::Data, to_payload(&request)?, timeout)
            .await?;
        let response = successful(response)?;

        Ok(response.data().cloned().unwrap_or_default())
    }

    async fn execute_ai(
        &self,
        parameters: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<Map<String, Value>, TaskError> {
        let prompt = required_str(parameters, "prompt")?;

        let request = AiRequest {
            correlation_id: String::new(),
            provider: optional_str(parameters, "provider").unwrap_or_else(|| "default".to_string()),
            prompt,
            system_message: optional_str(parameters, "system_message"),
            context: parameters.get("context").cloned(),
            response_format: optional_str(parameters, "response_format")
                .unwrap_or_else(|| "text".to_string()),
            model: optional_str(parameters, "model"),
            max_tokens: parameters
                .get("max_tokens")
                .and_then(Value::as_u64)
                .map(|v| v as u32),
            temperature: parameters.get("temperature").and_then(Value::as_f64),
        };

        let response = self
            .coordinator
            .call(ServiceKind::Ai, to_payload(&request)?, timeout)
            .await?;
        let response = successful(response)?;

        // The whole response body is the output: content, provider,
        // model, tokens_used, whatever else the worker reports
        Ok(response.body)
    }

    async fn execute_exec(
        &self,
        parameters: &Map<String, Value>,
        scope: &Scope<'_>,
        timeout: Duration,
    ) -> Result<Map<String, Value>, TaskError> {
        let image = required_str(parameters, "image")?;

        let mut input: ExecInput = optional_block(parameters, "input")?;
        if let Some(mappings) = parameters.get("input_mappings") {
            let mappings = mappings.as_object().ok_or_else(|| {
                TaskError::Parameter("input_mappings must be an object".to_string())
            })?;
            for (target, source) in mappings {
                let source_task = source.as_str().ok_or_else(|| {
                    TaskError::Parameter(format!(
                        "input_mappings.{target} must name a source task"
                    ))
                })?;
                match scope.resolve(source_task) {
                    Some(value) => {
                        input.input_data.insert(target.clone(), value);
                    }
                    None => {
                        return Err(TaskError::Parameter(format!(
                            "input_mappings.{target} references unknown task output {source_task}"
                        )))
                    }
                }
            }
        }

        let request = ExecRequest {
            correlation_id: String::new(),
            container: ContainerSpec {
                image,
                command: string_array(parameters, "command"),
                working_dir: optional_str(parameters, "working_dir"),
                ports: parameters
                    .get("ports")
                    .and_then(Value::as_array)
                    .map(|ports| {
                        ports
                            .iter()
                            .filter_map(Value::as_u64)
                            .map(|p| p as u16)
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            input,
            output: optional_block::<ExecOutput>(parameters, "output")?,
            environment: parameters
                .get("environment")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            timeout: Some(timeout.as_secs()),
            service_access: string_array(parameters, "service_access"),
        };

        let response = self
            .coordinator
            .call(ServiceKind::Exec, to_payload(&request)?, timeout)
            .await?;
        let response = successful(response)?;

        Ok(response.result().cloned().unwrap_or_else(|| {
            // No structured result block: keep whatever the worker sent
            response.body.clone()
        }))
    }

    async fn execute_parallel(
        &self,
        parameters: &Map<String, Value>,
        scope: &Scope<'_>,
    ) -> Result<Map<String, Value>, TaskError> {
        let sub_tasks: Vec<TaskSpec> = parameters
            .get("tasks")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| TaskError::Parameter(format!("invalid parallel sub-tasks: {e}")))?
            .unwrap_or_default();

        let runs = sub_tasks.iter().map(|sub| {
            let label = sub.id.clone();
            self.execute_boxed(sub, scope)
                .map(move |result| (label, result))
        });
        let outcomes = futures::future::join_all(runs).await;

        let mut results = Map::new();
        let mut failures = Vec::new();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(output) => {
                    results.insert(id, Value::Object(output));
                }
                Err(e) => failures.push(format!("{id}: {e}")),
            }
        }

        if !failures.is_empty() {
            return Err(TaskError::Parallel(failures.join("; ")));
        }

        let mut output = Map::new();
        output.insert("results".to_string(), Value::Object(results));
        Ok(output)
    }

    /// Boxed recursion point for parallel sub-tasks
    fn execute_boxed<'a>(
        &'a self,
        task: &'a TaskSpec,
        scope: &'a Scope<'a>,
    ) -> BoxFuture<'a, Result<Map<String, Value>, TaskError>> {
        async move { self.execute(task, &task.parameters, scope).await }.boxed()
    }
}

/// Evaluate a condition task
///
/// Condition tasks never fail a workflow: a syntax error completes the
/// task with `condition_result=false` and the error recorded in the
/// output for debugging. The expression is read from the raw spec, not
/// the interpolated parameters — the evaluator resolves `${name}`
/// references itself, with types intact.
fn execute_condition(task: &TaskSpec, scope: &Scope<'_>) -> Map<String, Value> {
    let expression = task.condition_expression().unwrap_or_default();

    let mut output = Map::new();
    output.insert("condition".to_string(), json!(expression));

    let result = match condition::evaluate(expression, scope) {
        Ok(result) => result,
        Err(e) => {
            debug!(error = %e, "condition failed to parse, treating as false");
            output.insert("condition_error".to_string(), json!(e.to_string()));
            false
        }
    };

    let follow_ups = if result {
        &task.on_success
    } else {
        &task.on_failure
    };

    output.insert("condition_result".to_string(), json!(result));
    output.insert("follow_up_tasks".to_string(), json!(follow_ups));
    output
}

fn to_payload<T: serde::Serialize>(request: &T) -> Result<Value, TaskError> {
    serde_json::to_value(request)
        .map_err(|e| TaskError::Parameter(format!("request encoding failed: {e}")))
}

fn successful(response: ServiceResponse) -> Result<ServiceResponse, TaskError> {
    if response.success {
        Ok(response)
    } else {
        Err(TaskError::Worker(
            response
                .error
                .unwrap_or_else(|| "worker reported failure without detail".to_string()),
        ))
    }
}

fn required_str(parameters: &Map<String, Value>, key: &str) -> Result<String, TaskError> {
    parameters
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or_else(|| TaskError::Parameter(format!("missing required parameter {key}")))
}

fn optional_str(parameters: &Map<String, Value>, key: &str) -> Option<String> {
    parameters
        .get(key)
        .and_then(Value::as_str)
        .map(String::from)
}

fn string_array(parameters: &Map<String, Value>, key: &str) -> Vec<String> {
    parameters
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn optional_block<T: serde::de::DeserializeOwned + Default>(
    parameters: &Map<String, Value>,
    key: &str,
) -> Result<T, TaskError> {
    match parameters.get(key) {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| TaskError::Parameter(format!("invalid {key} block: {e}"))),
        None => Ok(T::default()),
    }
}
