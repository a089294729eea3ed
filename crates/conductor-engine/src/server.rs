//! Workflow request handling
//!
//! The orchestrator's only control surface is the bus: it listens on
//! `workflow-requests`, resolves each submission to a definition
//! (inline, template, or AI-generated), runs it, and publishes the
//! outcome on `workflow-responses`. Each request is handled in its own
//! task so a slow workflow never blocks the listener.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use conductor_bus::{BusClient, BusError};
use conductor_contracts::{channels, WorkflowRequest, WorkflowResponse};
use conductor_core::{Status, WorkflowDefinition, WorkflowExecution};

use crate::executor::WorkflowExecutor;
use crate::generator::AiWorkflowGenerator;
use crate::templates::TemplateStore;

/// The orchestrator's bus-facing request loop
pub struct Orchestrator {
    bus: Arc<dyn BusClient>,
    executor: Arc<WorkflowExecutor>,
    templates: Arc<TemplateStore>,
    generator: Arc<AiWorkflowGenerator>,
}

impl Orchestrator {
    /// Wire the orchestrator together
    pub fn new(
        bus: Arc<dyn BusClient>,
        executor: Arc<WorkflowExecutor>,
        templates: Arc<TemplateStore>,
        generator: Arc<AiWorkflowGenerator>,
    ) -> Self {
        Self {
            bus,
            executor,
            templates,
            generator,
        }
    }

    /// Serve workflow requests until shutdown
    #[instrument(skip_all)]
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), BusError> {
        let mut requests = self.bus.subscribe(channels::WORKFLOW_REQUESTS).await?;
        info!("workflow request listener started");

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("workflow request listener shutting down");
                    return Ok(());
                }
                message = requests.recv() => {
                    match message {
                        Some(message) => {
                            let request: WorkflowRequest =
                                match serde_json::from_slice(&message.payload) {
                                    Ok(request) => request,
                                    Err(e) => {
                                        warn!(error = %e, "undecodable workflow request, dropping");
                                        continue;
                                    }
                                };
                            let orchestrator = Arc::clone(&self);
                            tokio::spawn(async move {
                                orchestrator.handle(request).await;
                            });
                        }
                        None => {
                            warn!("workflow request stream ended");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Handle one submission end to end
    async fn handle(&self, request: WorkflowRequest) {
        let received = Utc::now();
        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        let workflow = match self.resolve(&request).await {
            Ok(workflow) => workflow,
            Err(reason) => {
                warn!(%correlation_id, %reason, "workflow request rejected");
                self.publish_error(&correlation_id, &reason, received).await;
                return;
            }
        };

        debug!(%correlation_id, workflow_id = %workflow.id, "workflow resolved");
        let execution = self
            .executor
            .execute(&workflow, request.variables, Some(correlation_id.clone()))
            .await;

        let response = build_response(&correlation_id, &execution, received);
        self.publish_response(response).await;
    }

    /// Resolve the request to a runnable definition: inline first, then
    /// template, then AI generation
    async fn resolve(&self, request: &WorkflowRequest) -> Result<WorkflowDefinition, String> {
        if let Some(inline) = &request.workflow {
            return serde_json::from_value(inline.clone())
                .map_err(|e| format!("invalid inline workflow: {e}"));
        }

        if let Some(template_id) = &request.workflow_template {
            let template = self
                .templates
                .get(template_id)
                .ok_or_else(|| format!("unknown workflow template: {template_id}"))?;

            // Declared defaults fill gaps; required inputs must arrive
            // either as a default or on the request
            let mut workflow = template.workflow;
            for variable in &template.variables {
                if workflow.variables.contains_key(&variable.name)
                    || request.variables.contains_key(&variable.name)
                {
                    continue;
                }
                match &variable.default {
                    Some(default) => {
                        workflow
                            .variables
                            .insert(variable.name.clone(), default.clone());
                    }
                    None if variable.required => {
                        return Err(format!(
                            "template {template_id} requires variable {}",
                            variable.name
                        ));
                    }
                    None => {}
                }
            }
            return Ok(workflow);
        }

        if let Some(spec) = &request.generate_from_ai {
            return self
                .generator
                .generate(spec)
                .await
                .map_err(|e| format!("workflow generation failed: {e}"));
        }

        Err("request names no workflow, template, or generation prompt".to_string())
    }

    async fn publish_error(&self, correlation_id: &str, reason: &str, received: chrono::DateTime<Utc>) {
        let response = WorkflowResponse {
            correlation_id: correlation_id.to_string(),
            execution_id: String::new(),
            status: Status::Failed.to_string(),
            success: false,
            results: None,
            task_results: None,
            error: Some(reason.to_string()),
            duration: duration_millis(received),
            timestamp: Utc::now(),
        };
        self.publish_response(response).await;
    }

    async fn publish_response(&self, response: WorkflowResponse) {
        let payload = match serde_json::to_vec(&response) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "workflow response encoding failed");
                return;
            }
        };
        if let Err(e) = self.bus.publish(channels::WORKFLOW_RESPONSES, payload).await {
            warn!(
                correlation_id = %response.correlation_id,
                error = %e,
                "workflow response publish failed"
            );
        }
    }
}

/// Render an execution into the wire response
fn build_response(
    correlation_id: &str,
    execution: &WorkflowExecution,
    received: chrono::DateTime<Utc>,
) -> WorkflowResponse {
    let success = execution.status == Status::Completed;

    let mut task_results = Map::new();
    for (task_id, state) in &execution.task_states {
        let mut entry = Map::new();
        entry.insert("status".to_string(), Value::String(state.status.to_string()));
        entry.insert(
            "retry_count".to_string(),
            Value::Number(state.retry_count.into()),
        );
        if !state.output.is_empty() {
            entry.insert("output".to_string(), Value::Object(state.output.clone()));
        }
        if let Some(error) = &state.error {
            entry.insert("error".to_string(), Value::String(error.clone()));
        }
        task_results.insert(task_id.clone(), Value::Object(entry));
    }

    WorkflowResponse {
        correlation_id: correlation_id.to_string(),
        execution_id: execution.id.clone(),
        status: execution.status.to_string(),
        success,
        results: success.then(|| execution.completed_outputs()),
        task_results: Some(task_results),
        error: execution.error.clone(),
        duration: duration_millis(received),
        timestamp: Utc::now(),
    }
}

fn duration_millis(since: chrono::DateTime<Utc>) -> u64 {
    Utc::now()
        .signed_duration_since(since)
        .num_milliseconds()
        .max(0) as u64
}
