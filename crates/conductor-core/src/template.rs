//! Parameterised workflow templates
//!
//! Templates live as YAML files on disk and are strict: unknown fields
//! are rejected so a typo in a template fails loudly at load time
//! instead of silently changing behaviour. Bus payloads stay tolerant;
//! only on-disk artifacts get this treatment.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dag::TaskDag;
use crate::model::{ValidationError, WorkflowDefinition};

/// A declared template input
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateVariable {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
}

/// A reusable, parameterised workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Template {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<TemplateVariable>,
    pub workflow: WorkflowDefinition,
}

impl Template {
    /// Validate the embedded workflow, including DAG construction
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.workflow.validate()?;
        TaskDag::build(&self.workflow.tasks)?;
        Ok(())
    }

    /// Names of required variables with no default
    pub fn required_variables(&self) -> Vec<&str> {
        self.variables
            .iter()
            .filter(|v| v.required && v.default.is_none())
            .map(|v| v.name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TaskSpec, TaskType};
    use serde_json::json;

    const EXAMPLE: &str = r#"
id: enrich-graph
name: Enrich graph nodes
category: data
variables:
  - name: limit
    description: Max nodes per pass
    default: 100
  - name: label
    required: true
workflow:
  id: enrich-graph
  name: Enrich graph nodes
  timeout_seconds: 600
  variables:
    limit: 100
  tasks:
    - id: fetch
      type: data
      parameters:
        operation: query
        query:
          cypher: "MATCH (n:${label}) RETURN n LIMIT ${limit}"
    - id: summarize
      type: ai
      depends_on: [fetch]
      parameters:
        prompt: "Summarize: ${fetch.data}"
"#;

    #[test]
    fn test_parse_and_validate_yaml() {
        let template: Template = serde_yaml::from_str(EXAMPLE).expect("should parse");
        template.validate().expect("should validate");
        assert_eq!(template.id, "enrich-graph");
        assert_eq!(template.workflow.tasks.len(), 2);
        assert_eq!(template.required_variables(), vec!["label"]);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let with_extra = format!("{EXAMPLE}\nsurprise: field\n");
        let result: Result<Template, _> = serde_yaml::from_str(&with_extra);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_embedded_workflow_rejected() {
        let template = Template {
            id: "bad".to_string(),
            name: "bad".to_string(),
            description: None,
            category: String::new(),
            variables: vec![],
            workflow: WorkflowDefinition::new("bad", "bad")
                .with_task(
                    TaskSpec::new("a", TaskType::Data)
                        .with_parameter("operation", json!("query"))
                        .with_depends_on(["b"]),
                )
                .with_task(
                    TaskSpec::new("b", TaskType::Data)
                        .with_parameter("operation", json!("query"))
                        .with_depends_on(["a"]),
                ),
        };

        let error = template.validate().expect_err("cycle should fail");
        assert!(error.to_string().contains("cycle"));
    }

    #[test]
    fn test_round_trip_preserves_template() {
        let template: Template = serde_yaml::from_str(EXAMPLE).expect("should parse");
        let yaml = serde_yaml::to_string(&template).expect("should serialize");
        let reparsed: Template = serde_yaml::from_str(&yaml).expect("should reparse");

        assert_eq!(reparsed.id, template.id);
        assert_eq!(reparsed.variables.len(), template.variables.len());
        assert_eq!(
            serde_json::to_value(&reparsed.workflow).unwrap(),
            serde_json::to_value(&template.workflow).unwrap()
        );
    }
}
