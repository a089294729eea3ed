//! `${name}` placeholder interpolation
//!
//! Task parameters are interpolated once per attempt, on a deep copy —
//! the definition is never mutated. A string that is exactly one
//! placeholder keeps the variable's JSON type; embedded placeholders
//! render inline. Unknown names stay literal so a misspelled variable is
//! visible in the worker request instead of silently vanishing.

use serde_json::{Map, Value};

/// Variable resolution scope for one task attempt
///
/// Plain names resolve against the execution's variable map. Dotted
/// paths (`task_id.field.sub`) walk into object variables first, then
/// into the outputs of completed upstream tasks — the mechanism that
/// feeds one task's output into the next task's parameters.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    variables: &'a Map<String, Value>,
    outputs: Option<&'a Map<String, Value>>,
}

impl<'a> Scope<'a> {
    /// Scope over variables only
    pub fn new(variables: &'a Map<String, Value>) -> Self {
        Self {
            variables,
            outputs: None,
        }
    }

    /// Scope over variables plus completed task outputs
    pub fn with_outputs(
        variables: &'a Map<String, Value>,
        outputs: &'a Map<String, Value>,
    ) -> Self {
        Self {
            variables,
            outputs: Some(outputs),
        }
    }

    /// Resolve a placeholder name to a value, if known
    pub fn resolve(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.variables.get(name) {
            return Some(value.clone());
        }

        let mut segments = name.split('.');
        let root = segments.next()?;
        let start = self
            .variables
            .get(root)
            .or_else(|| self.outputs.and_then(|outputs| outputs.get(root)))?;

        let mut current = start;
        for segment in segments {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }
}

/// Interpolate every string in a parameter map, returning a new map
pub fn interpolate_parameters(parameters: &Map<String, Value>, scope: &Scope<'_>) -> Map<String, Value> {
    parameters
        .iter()
        .map(|(key, value)| (key.clone(), interpolate_value(value, scope)))
        .collect()
}

/// Interpolate one JSON value recursively
pub fn interpolate_value(value: &Value, scope: &Scope<'_>) -> Value {
    match value {
        Value::String(s) => interpolate_string(s, scope),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| interpolate_value(item, scope))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), interpolate_value(item, scope)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn interpolate_string(input: &str, scope: &Scope<'_>) -> Value {
    // Whole-string placeholder: substitute the raw value, keeping its type
    if let Some(name) = whole_placeholder(input) {
        return match scope.resolve(name) {
            Some(value) => value,
            None => Value::String(input.to_string()),
        };
    }

    if !input.contains("${") {
        return Value::String(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match scope.resolve(name) {
                    Some(value) => result.push_str(&render(&value)),
                    // Unknown name: keep the literal placeholder
                    None => {
                        result.push_str("${");
                        result.push_str(name);
                        result.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated placeholder: keep the tail verbatim
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    Value::String(result)
}

fn whole_placeholder(input: &str) -> Option<&str> {
    let name = input.strip_prefix("${")?.strip_suffix('}')?;
    if name.contains("${") || name.contains('}') {
        return None;
    }
    Some(name)
}

/// Render a value for embedding inside a string
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn variables() -> Map<String, Value> {
        let mut vars = Map::new();
        vars.insert("limit".to_string(), json!(5));
        vars.insert("name".to_string(), json!("atlas"));
        vars.insert("enabled".to_string(), json!(true));
        vars.insert("config".to_string(), json!({"host": "db-1", "port": 7687}));
        vars
    }

    #[test]
    fn test_embedded_placeholder_renders_inline() {
        let vars = variables();
        let scope = Scope::new(&vars);
        let result = interpolate_value(
            &json!("MATCH (n) RETURN n LIMIT ${limit}"),
            &scope,
        );
        assert_eq!(result, json!("MATCH (n) RETURN n LIMIT 5"));
    }

    #[test]
    fn test_whole_placeholder_keeps_type() {
        let vars = variables();
        let scope = Scope::new(&vars);
        assert_eq!(interpolate_value(&json!("${limit}"), &scope), json!(5));
        assert_eq!(interpolate_value(&json!("${enabled}"), &scope), json!(true));
        assert_eq!(
            interpolate_value(&json!("${config}"), &scope),
            json!({"host": "db-1", "port": 7687})
        );
    }

    #[test]
    fn test_unknown_names_stay_literal() {
        let vars = variables();
        let scope = Scope::new(&vars);
        assert_eq!(
            interpolate_value(&json!("value: ${ghost}"), &scope),
            json!("value: ${ghost}")
        );
        assert_eq!(
            interpolate_value(&json!("${ghost}"), &scope),
            json!("${ghost}")
        );
    }

    #[test]
    fn test_nested_structures_are_walked() {
        let vars = variables();
        let scope = Scope::new(&vars);
        let params = json!({
            "query": {"cypher": "MATCH (n:${name}) RETURN n LIMIT ${limit}"},
            "tags": ["${name}", "static"]
        });

        let result = interpolate_value(&params, &scope);
        assert_eq!(
            result["query"]["cypher"],
            json!("MATCH (n:atlas) RETURN n LIMIT 5")
        );
        assert_eq!(result["tags"], json!(["atlas", "static"]));
    }

    #[test]
    fn test_dotted_path_into_variable() {
        let vars = variables();
        let scope = Scope::new(&vars);
        assert_eq!(
            interpolate_value(&json!("bolt://${config.host}:${config.port}"), &scope),
            json!("bolt://db-1:7687")
        );
    }

    #[test]
    fn test_dotted_path_into_task_output() {
        let vars = variables();
        let mut outputs = Map::new();
        outputs.insert("fetch".to_string(), json!({"data": {"count": 12}}));
        let scope = Scope::with_outputs(&vars, &outputs);

        assert_eq!(
            interpolate_value(&json!("${fetch.data.count}"), &scope),
            json!(12)
        );
    }

    #[test]
    fn test_variables_shadow_outputs() {
        let vars = variables();
        let mut outputs = Map::new();
        outputs.insert("name".to_string(), json!({"field": "from-output"}));
        let scope = Scope::with_outputs(&vars, &outputs);

        assert_eq!(interpolate_value(&json!("${name}"), &scope), json!("atlas"));
    }

    #[test]
    fn test_interpolation_is_idempotent() {
        let vars = variables();
        let scope = Scope::new(&vars);
        let params = json!({
            "a": "LIMIT ${limit}",
            "b": "${ghost} stays",
            "c": ["${name}", {"d": "${enabled}"}]
        });

        let once = interpolate_value(&params, &scope);
        let twice = interpolate_value(&once, &scope);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unterminated_placeholder_kept() {
        let vars = variables();
        let scope = Scope::new(&vars);
        assert_eq!(
            interpolate_value(&json!("broken ${limit"), &scope),
            json!("broken ${limit")
        );
    }

    #[test]
    fn test_multiple_placeholders_in_one_string() {
        let vars = variables();
        let scope = Scope::new(&vars);
        assert_eq!(
            interpolate_value(&json!("${name}-${limit}-${name}"), &scope),
            json!("atlas-5-atlas")
        );
    }
}
