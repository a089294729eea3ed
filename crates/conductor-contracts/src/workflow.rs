// Workflow submission and outcome DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Inbound workflow submission
///
/// Exactly one of `workflow`, `workflow_template`, or `generate_from_ai`
/// selects the definition; `variables` override the definition's own.
/// Unknown fields are tolerated for forward compatibility.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate_from_ai: Option<GenerateSpec>,
}

/// AI-generation parameters carried on a workflow request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateSpec {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_services: Vec<String>,
}

/// Outbound workflow outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResponse {
    pub correlation_id: String,
    pub execution_id: String,
    pub status: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_results: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock duration in milliseconds
    pub duration: u64,
    pub timestamp: DateTime<Utc>,
}
