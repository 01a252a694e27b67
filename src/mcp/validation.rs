//! Tool argument validation
//!
//! Checks `tools/call` arguments against the tool's input schema before any
//! handler runs, so a malformed call never touches a store.

use jsonschema::Validator;
use serde_json::{Map, Value};

use crate::mcp::errors::McpError;
use crate::mcp::protocol::Tool;

/// Compiled input schema of one tool
pub struct ArgumentSchema {
    tool: String,
    validator: Validator,
}

impl std::fmt::Debug for ArgumentSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArgumentSchema").field("tool", &self.tool).finish_non_exhaustive()
    }
}

impl ArgumentSchema {
    /// Compile the declared `input_schema` of `tool`
    #[inline]
    pub fn compile(tool: &Tool) -> Result<Self, McpError> {
        let validator = Validator::new(&tool.input_schema)?;
        Ok(Self {
            tool: tool.name.clone(),
            validator,
        })
    }

    /// Check `values` against the schema
    ///
    /// Null values count as absent. Every violation is reported in one
    /// message.
    #[inline]
    pub fn validate(&self, values: Option<Map<String, Value>>) -> Result<ToolArguments, McpError> {
        let mut values = values.unwrap_or_default();
        values.retain(|_, value| !value.is_null());

        let instance = Value::Object(values);
        let violations: Vec<String> = self
            .validator
            .iter_errors(&instance)
            .map(|error| {
                let path = error.instance_path.to_string();
                if path.is_empty() {
                    error.to_string()
                } else {
                    format!("{}: {}", path, error)
                }
            })
            .collect();
        if !violations.is_empty() {
            return Err(McpError::InvalidToolArguments {
                tool: self.tool.clone(),
                message: violations.join("; "),
            });
        }

        match instance {
            Value::Object(values) => Ok(ToolArguments {
                tool: self.tool.clone(),
                values,
            }),
            other => Err(McpError::InvalidToolArguments {
                tool: self.tool.clone(),
                message: format!("arguments must be an object, got {}", other),
            }),
        }
    }
}

/// Validated arguments of one tool call
#[derive(Debug, Clone)]
pub struct ToolArguments {
    tool: String,
    values: Map<String, Value>,
}

impl ToolArguments {
    #[inline]
    pub fn tool(&self) -> &str {
        &self.tool
    }

    #[inline]
    pub fn optional_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    /// A string argument the schema marks as required
    #[inline]
    pub fn required_str(&self, name: &str) -> Result<&str, McpError> {
        self.optional_str(name)
            .ok_or_else(|| McpError::InvalidToolArguments {
                tool: self.tool.clone(),
                message: format!("missing required argument '{}'", name),
            })
    }

    #[inline]
    pub fn optional_bool(&self, name: &str) -> Option<bool> {
        self.values.get(name).and_then(Value::as_bool)
    }

    /// A non-negative integer argument, `default` when absent
    #[inline]
    pub fn count(&self, name: &str, default: usize) -> Result<usize, McpError> {
        match self.values.get(name) {
            None | Some(Value::Null) => Ok(default),
            Some(value) => value
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| McpError::InvalidToolArguments {
                    tool: self.tool.clone(),
                    message: format!("argument '{}' must be a non-negative integer", name),
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool() -> Tool {
        Tool {
            name: "search_code".to_string(),
            description: None,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "n": {"type": "integer"},
                    "language": {"type": "string", "enum": ["java", "python"]}
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        }
    }

    fn schema() -> ArgumentSchema {
        ArgumentSchema::compile(&tool()).expect("should compile schema")
    }

    fn args(value: Value) -> Option<Map<String, Value>> {
        value.as_object().cloned()
    }

    #[test]
    fn accepts_well_formed_arguments() {
        let parsed = schema()
            .validate(args(json!({"query": "auth", "n": 3})))
            .expect("should validate");
        assert_eq!(parsed.required_str("query").expect("should have query"), "auth");
        assert_eq!(parsed.count("n", 5).expect("should read n"), 3);
        assert_eq!(parsed.optional_str("language"), None);
    }

    #[test]
    fn missing_required_argument_is_rejected() {
        let error = schema().validate(None).expect_err("should reject");
        assert!(matches!(error, McpError::InvalidToolArguments { .. }));
        assert!(error.to_string().contains("query"));
    }

    #[test]
    fn wrong_types_and_unknown_names_are_rejected() {
        for bad in [
            json!({"query": 7}),
            json!({"query": "q", "n": "five"}),
            json!({"query": "q", "n": -1}),
            json!({"query": "q", "site_id": 1}),
            json!({"query": "q", "language": "cobol"}),
        ] {
            let result = schema()
                .validate(args(bad.clone()))
                .and_then(|parsed| parsed.count("n", 5).map(|_| parsed));
            assert!(result.is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn count_defaults_when_absent() {
        let parsed = schema().validate(args(json!({"query": "q"}))).expect("should validate");
        assert_eq!(parsed.count("n", 10).expect("should default"), 10);
    }

    #[test]
    fn null_values_count_as_absent() {
        let parsed = schema()
            .validate(args(json!({"query": "q", "n": null, "language": null})))
            .expect("should validate");
        assert_eq!(parsed.count("n", 10).expect("should default"), 10);
        assert_eq!(parsed.optional_str("language"), None);

        let error = schema()
            .validate(args(json!({"query": null})))
            .expect_err("null required argument should be rejected");
        assert!(error.to_string().contains("query"));
    }

    #[test]
    fn every_violation_is_reported() {
        let error = schema()
            .validate(args(json!({"n": "five", "site_id": 1})))
            .expect_err("should reject");
        let message = error.to_string();
        assert!(message.contains("query"), "{}", message);
        assert!(message.contains("/n"), "{}", message);
        assert!(message.contains("site_id"), "{}", message);
    }

    #[test]
    fn broken_schema_fails_to_compile() {
        let mut broken = tool();
        broken.input_schema = json!({"type": "no-such-type"});
        let error = ArgumentSchema::compile(&broken).expect_err("should reject schema");
        assert!(matches!(error, McpError::InternalError { .. }));
    }
}
