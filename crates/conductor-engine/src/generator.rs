//! AI workflow generation
//!
//! Builds a prompt from the capability registry's current view, asks the
//! AI worker for a YAML workflow definition, then validates and enhances
//! the result: default ids and names, default retry policies on worker
//! tasks, a default timeout, and a full DAG validation before anything
//! reaches the executor.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use conductor_bus::{CorrelationCoordinator, CorrelationError};
use conductor_contracts::{AiRequest, GenerateSpec, ServiceKind};
use conductor_core::{RetryPolicy, TaskDag, TaskType, ValidationError, WorkflowDefinition};

use crate::registry::CapabilityRegistry;

/// Error type for generation
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    /// The call to the AI worker failed
    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    /// The AI worker reported failure or returned no content
    #[error("ai worker error: {0}")]
    Worker(String),

    /// The returned YAML did not parse as a workflow
    #[error("generated workflow did not parse: {0}")]
    Parse(String),

    /// The generated workflow failed validation
    #[error("generated workflow invalid: {0}")]
    Validation(#[from] ValidationError),
}

/// Generator configuration
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Deadline for the AI call
    pub timeout: Duration,

    /// Provider hint passed to the AI worker
    pub provider: String,

    /// Model override, if any
    pub model: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            provider: "default".to_string(),
            model: None,
        }
    }
}

/// Materialises workflow definitions from natural-language prompts
pub struct AiWorkflowGenerator {
    coordinator: Arc<CorrelationCoordinator>,
    registry: Arc<CapabilityRegistry>,
    config: GeneratorConfig,
}

impl AiWorkflowGenerator {
    /// Create a generator
    pub fn new(
        coordinator: Arc<CorrelationCoordinator>,
        registry: Arc<CapabilityRegistry>,
        config: GeneratorConfig,
    ) -> Self {
        Self {
            coordinator,
            registry,
            config,
        }
    }

    /// Generate a validated workflow definition
    #[instrument(skip_all)]
    pub async fn generate(&self, spec: &GenerateSpec) -> Result<WorkflowDefinition, GeneratorError> {
        let prompt = self.build_prompt(spec);
        debug!(prompt_len = prompt.len(), "generation prompt built");

        let request = AiRequest {
            correlation_id: String::new(),
            provider: self.config.provider.clone(),
            prompt,
            system_message: Some(SYSTEM_MESSAGE.to_string()),
            context: None,
            response_format: "yaml".to_string(),
            model: self.config.model.clone(),
            max_tokens: None,
            temperature: None,
        };
        let payload = serde_json::to_value(&request)
            .map_err(|e| GeneratorError::Parse(e.to_string()))?;

        let response = self
            .coordinator
            .call(ServiceKind::Ai, payload, self.config.timeout)
            .await?;
        if !response.success {
            return Err(GeneratorError::Worker(
                response
                    .error
                    .unwrap_or_else(|| "generation failed without detail".to_string()),
            ));
        }
        let content = response
            .content()
            .ok_or_else(|| GeneratorError::Worker("response carried no content".to_string()))?;

        let mut workflow: WorkflowDefinition = serde_yaml::from_str(strip_fences(content))
            .map_err(|e| GeneratorError::Parse(e.to_string()))?;

        enhance(&mut workflow, spec);
        workflow.validate()?;
        TaskDag::build(&workflow.tasks).map_err(ValidationError::from)?;

        info!(
            workflow_id = %workflow.id,
            tasks = workflow.tasks.len(),
            "workflow generated"
        );
        Ok(workflow)
    }

    fn build_prompt(&self, spec: &GenerateSpec) -> String {
        let mut prompt = String::new();
        prompt.push_str("Design a workflow for the following request.\n\n");
        prompt.push_str(&format!("Request: {}\n", spec.prompt));

        if let Some(domain) = &spec.domain {
            prompt.push_str(&format!("Domain: {domain}\n"));
        }

        let complexity = spec.complexity.as_deref().unwrap_or("medium");
        prompt.push_str(&format!(
            "Complexity: {complexity} — {}\n",
            complexity_hint(complexity)
        ));

        if !spec.required_services.is_empty() {
            prompt.push_str("\nRequired services:\n");
            for service in &spec.required_services {
                let available = self.registry.is_available(service);
                prompt.push_str(&format!(
                    "- {service}: {}\n",
                    if available { "available" } else { "UNAVAILABLE" }
                ));
            }
        }

        prompt.push_str("\nCurrently available operations:\n");
        prompt.push_str(&self.registry.summary());
        prompt
    }
}

const SYSTEM_MESSAGE: &str = "You produce workflow definitions as YAML. \
Respond with a single YAML document containing: id, name, \
timeout_seconds, variables, and tasks. Each task has id, type (one of \
data, ai, exec, parallel, condition), parameters, and depends_on. Use \
only the operations listed as available. No prose, no markdown fences.";

fn complexity_hint(complexity: &str) -> &'static str {
    match complexity {
        "simple" => "2-3 sequential tasks, no branching",
        "complex" => "parallel branches, conditions, and data handoff between tasks",
        _ => "a handful of tasks with at most one parallel section",
    }
}

/// Strip markdown code fences that models wrap YAML in despite the
/// system message
fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("yaml").or(rest.strip_prefix("yml")).unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Fill in what the model left out
fn enhance(workflow: &mut WorkflowDefinition, spec: &GenerateSpec) {
    if workflow.id.is_empty() {
        workflow.id = format!("generated-{}", Uuid::now_v7());
    }
    if workflow.name.is_empty() {
        let mut name: String = spec.prompt.chars().take(60).collect();
        if name.is_empty() {
            name = workflow.id.clone();
        }
        workflow.name = name;
    }
    if workflow.timeout_seconds == 0 {
        workflow.timeout_seconds = 3600;
    }

    for (index, task) in workflow.tasks.iter_mut().enumerate() {
        if task.id.is_empty() {
            task.id = format!("task-{index}");
        }
        let dispatches_to_worker = matches!(
            task.task_type,
            TaskType::Data | TaskType::Ai | TaskType::Exec
        );
        if dispatches_to_worker && task.retry_policy.is_none() {
            task.retry_policy = Some(RetryPolicy::exponential());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_bus::{BusClient, CorrelationConfig, InMemoryBus};
    use conductor_contracts::channels;
    use conductor_core::BackoffKind;
    use serde_json::{json, Value};

    const GENERATED_YAML: &str = r#"
name: ""
timeout_seconds: 0
tasks:
  - id: fetch
    type: data
    parameters:
      operation: query
  - id: ""
    type: ai
    depends_on: [fetch]
    parameters:
      prompt: "Summarize ${fetch.data}"
"#;

    async fn harness(ai_content: &str) -> (Arc<InMemoryBus>, AiWorkflowGenerator) {
        let bus = Arc::new(InMemoryBus::new());
        let coordinator = Arc::new(CorrelationCoordinator::new(
            bus.clone(),
            CorrelationConfig::default(),
        ));
        coordinator.start().await.unwrap();
        let registry = Arc::new(CapabilityRegistry::new(
            bus.clone(),
            crate::registry::RegistryConfig::default(),
        ));

        // Scripted AI worker returning the canned YAML
        let mut requests = bus.subscribe(channels::AI_REQUESTS).await.unwrap();
        let content = ai_content.to_string();
        {
            let bus = bus.clone();
            tokio::spawn(async move {
                while let Some(message) = requests.recv().await {
                    let request: Value = serde_json::from_slice(&message.payload).unwrap();
                    let response = json!({
                        "correlation_id": request["correlation_id"],
                        "success": true,
                        "content": content,
                        "provider": "mock",
                        "response_format": "yaml"
                    });
                    bus.publish(channels::AI_RESPONSES, serde_json::to_vec(&response).unwrap())
                        .await
                        .unwrap();
                }
            });
        }

        let generator =
            AiWorkflowGenerator::new(coordinator, registry, GeneratorConfig::default());
        (bus, generator)
    }

    #[tokio::test]
    async fn test_generate_parses_and_enhances() {
        let (_bus, generator) = harness(GENERATED_YAML).await;

        let workflow = generator
            .generate(&GenerateSpec {
                prompt: "summarize recent graph changes".to_string(),
                domain: Some("graph".to_string()),
                complexity: Some("simple".to_string()),
                required_services: vec![],
            })
            .await
            .expect("should generate");

        // Defaults filled in
        assert!(workflow.id.starts_with("generated-"));
        assert_eq!(workflow.name, "summarize recent graph changes");
        assert_eq!(workflow.timeout_seconds, 3600);

        // Blank task id assigned by position
        assert_eq!(workflow.tasks[1].id, "task-1");

        // Worker tasks got default exponential retry policies
        for task in &workflow.tasks {
            let policy = task.retry_policy.as_ref().expect("policy added");
            assert_eq!(policy.backoff_type, BackoffKind::Exponential);
        }
    }

    #[tokio::test]
    async fn test_generate_strips_markdown_fences() {
        let fenced = format!("```yaml\n{GENERATED_YAML}\n```");
        let (_bus, generator) = harness(&fenced).await;

        let workflow = generator
            .generate(&GenerateSpec {
                prompt: "x".to_string(),
                domain: None,
                complexity: None,
                required_services: vec![],
            })
            .await
            .expect("should generate");
        assert_eq!(workflow.tasks.len(), 2);
    }

    #[tokio::test]
    async fn test_generate_rejects_unknown_dependency() {
        let bad = r#"
name: bad
tasks:
  - id: a
    type: data
    depends_on: [ghost]
    parameters:
      operation: query
"#;
        let (_bus, generator) = harness(bad).await;

        let error = generator
            .generate(&GenerateSpec {
                prompt: "x".to_string(),
                domain: None,
                complexity: None,
                required_services: vec![],
            })
            .await
            .expect_err("should reject");
        assert!(matches!(error, GeneratorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_generate_rejects_unknown_task_type() {
        let bad = r#"
name: bad
tasks:
  - id: a
    type: quantum
    parameters: {}
"#;
        let (_bus, generator) = harness(bad).await;

        let error = generator
            .generate(&GenerateSpec {
                prompt: "x".to_string(),
                domain: None,
                complexity: None,
                required_services: vec![],
            })
            .await
            .expect_err("should reject");
        assert!(matches!(error, GeneratorError::Parse(_)));
    }

    #[test]
    fn test_strip_fences_variants() {
        assert_eq!(strip_fences("plain: yaml"), "plain: yaml");
        assert_eq!(strip_fences("```yaml\na: 1\n```"), "a: 1");
        assert_eq!(strip_fences("```\na: 1\n```"), "a: 1");
    }
}
