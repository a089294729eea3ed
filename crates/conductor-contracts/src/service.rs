// Service request/response DTOs
//
// Requests are strict on our side (we build them); responses are decoded
// tolerantly so workers can grow their payloads without breaking us.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::channels;

/// The classes of worker service the orchestrator dispatches to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// Graph/vector/document data operations
    Data,
    /// AI provider calls
    Ai,
    /// Sandboxed container execution
    Exec,
}

impl ServiceKind {
    /// All dispatchable service kinds
    pub const ALL: [ServiceKind; 3] = [ServiceKind::Data, ServiceKind::Ai, ServiceKind::Exec];

    /// Channel this service reads requests from
    pub fn request_channel(&self) -> &'static str {
        match self {
            ServiceKind::Data => channels::DATA_REQUESTS,
            ServiceKind::Ai => channels::AI_REQUESTS,
            ServiceKind::Exec => channels::EXEC_REQUESTS,
        }
    }

    /// Channel this service writes responses to
    pub fn response_channel(&self) -> &'static str {
        match self {
            ServiceKind::Data => channels::DATA_RESPONSES,
            ServiceKind::Ai => channels::AI_RESPONSES,
            ServiceKind::Exec => channels::EXEC_RESPONSES,
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceKind::Data => write!(f, "data"),
            ServiceKind::Ai => write!(f, "ai"),
            ServiceKind::Exec => write!(f, "exec"),
        }
    }
}

impl std::str::FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data" => Ok(ServiceKind::Data),
            "ai" => Ok(ServiceKind::Ai),
            "exec" => Ok(ServiceKind::Exec),
            _ => Err(format!("Unknown service kind: {}", s)),
        }
    }
}

/// Request to the data worker
///
/// Beyond `operation`, the payload is operation-specific (query, enrich,
/// limit, ...) and travels flattened alongside the fixed fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRequest {
    pub correlation_id: String,
    pub operation: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

/// Request to the AI worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiRequest {
    pub correlation_id: String,
    pub provider: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub response_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl AiRequest {
    /// A plain-text prompt with provider defaults
    pub fn text(correlation_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            provider: "default".to_string(),
            prompt: prompt.into(),
            system_message: None,
            context: None,
            response_format: "text".to_string(),
            model: None,
            max_tokens: None,
            temperature: None,
        }
    }
}

/// Container specification for an exec request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,
}

/// Input block for an exec request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub minio_objects: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub files: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config_data: Map<String, Value>,
    /// Upstream task outputs resolved through `input_mappings`
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub input_data: Map<String, Value>,
}

/// Output expectations for an exec request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecOutput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_files: Vec<String>,
    #[serde(default)]
    pub minio_upload: bool,
    #[serde(default)]
    pub graph_update: bool,
    #[serde(default)]
    pub return_logs: bool,
}

/// Request to the container-execution worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecRequest {
    pub correlation_id: String,
    pub container: ContainerSpec,
    #[serde(default)]
    pub input: ExecInput,
    #[serde(default)]
    pub output: ExecOutput,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub environment: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_access: Vec<String>,
}

/// A response from any worker service
///
/// The fixed envelope is `correlation_id`, `success`, `error`,
/// `timestamp`; everything else (data block, AI content, exec result)
/// stays in `body` and is reached through the typed accessors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub correlation_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl ServiceResponse {
    /// A successful response with the given body fields
    pub fn ok(correlation_id: impl Into<String>, body: Map<String, Value>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            success: true,
            error: None,
            timestamp: Some(Utc::now()),
            body,
        }
    }

    /// A failed response carrying an error message
    pub fn err(correlation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            success: false,
            error: Some(error.into()),
            timestamp: Some(Utc::now()),
            body: Map::new(),
        }
    }

    /// The `data` block of a data-worker response, if present
    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.body.get("data").and_then(Value::as_object)
    }

    /// The `content` field of an AI-worker response, if present
    pub fn content(&self) -> Option<&str> {
        self.body.get("content").and_then(Value::as_str)
    }

    /// The `result` block of an exec-worker response, if present
    pub fn result(&self) -> Option<&Map<String, Value>> {
        self.body.get("result").and_then(Value::as_object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_service_kind_channels() {
        assert_eq!(ServiceKind::Data.request_channel(), "data-requests");
        assert_eq!(ServiceKind::Data.response_channel(), "data-responses");
        assert_eq!(ServiceKind::Ai.request_channel(), "ai-requests");
        assert_eq!(ServiceKind::Exec.response_channel(), "exec-responses");
    }

    #[test]
    fn test_service_kind_round_trip() {
        for kind in ServiceKind::ALL {
            let parsed: ServiceKind = kind.to_string().parse().expect("should parse");
            assert_eq!(parsed, kind);
        }
        assert!("graph".parse::<ServiceKind>().is_err());
    }

    #[test]
    fn test_data_request_flattens_params() {
        let mut params = Map::new();
        params.insert("query".to_string(), json!({"cypher": "MATCH (n) RETURN n"}));
        params.insert("limit".to_string(), json!(10));

        let request = DataRequest {
            correlation_id: "c-1".to_string(),
            operation: "query".to_string(),
            params,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["correlation_id"], "c-1");
        assert_eq!(value["operation"], "query");
        assert_eq!(value["limit"], 10);
        assert_eq!(value["query"]["cypher"], "MATCH (n) RETURN n");
    }

    #[test]
    fn test_response_round_trip_preserves_fields() {
        let raw = json!({
            "correlation_id": "c-2",
            "success": true,
            "timestamp": "2024-03-01T12:00:00Z",
            "data": {"nodes": [1, 2, 3]},
            "provider": "openai",
            "tokens_used": 42
        });

        let response: ServiceResponse = serde_json::from_value(raw.clone()).unwrap();
        assert!(response.success);
        assert_eq!(response.data().unwrap()["nodes"], json!([1, 2, 3]));
        assert_eq!(response.body["tokens_used"], 42);

        let back = serde_json::to_value(&response).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn test_response_tolerates_unknown_fields() {
        let raw = json!({
            "correlation_id": "c-3",
            "success": false,
            "error": "boom",
            "some_future_field": {"nested": true}
        });

        let response: ServiceResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(response.error.as_deref(), Some("boom"));
        assert!(response.body.contains_key("some_future_field"));
    }

    #[test]
    fn test_ai_request_text_defaults() {
        let request = AiRequest::text("c-4", "hello");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["provider"], "default");
        assert_eq!(value["response_format"], "text");
        assert!(value.get("model").is_none());
    }
}
