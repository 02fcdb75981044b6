//! Tool registry: schemas and argument validation.
//!
//! The registry is the discovery surface (`tools/list`) and the home of the
//! per-tool argument check. Validation is a pluggable predicate — the
//! orchestrator consults whatever [`ArgumentValidator`] the registry was
//! built with, and the default only enforces the schema's `required` list.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool definition as advertised to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name.
    pub name: String,
    /// Tool description.
    #[serde(default)]
    pub description: String,
    /// JSON Schema for input parameters.
    #[serde(
        default = "default_input_schema",
        rename = "inputSchema",
        alias = "input_schema"
    )]
    pub input_schema: Value,
}

fn default_input_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Predicate deciding whether an arguments map satisfies a tool's schema.
/// Returns the offending fields on failure.
pub trait ArgumentValidator: Send + Sync {
    fn validate(
        &self,
        spec: &ToolSpec,
        arguments: Option<&serde_json::Map<String, Value>>,
    ) -> Result<(), Vec<String>>;
}

/// Default validator: every field in the schema's `required` list must be
/// present. Shape checking beyond that belongs to the schema layer.
#[derive(Debug, Default)]
pub struct RequiredFieldsValidator;

impl ArgumentValidator for RequiredFieldsValidator {
    fn validate(
        &self,
        spec: &ToolSpec,
        arguments: Option<&serde_json::Map<String, Value>>,
    ) -> Result<(), Vec<String>> {
        let required = spec
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|a| a.as_slice())
            .unwrap_or_default();

        let missing: Vec<String> = required
            .iter()
            .filter_map(Value::as_str)
            .filter(|field| {
                arguments
                    .map(|args| !args.contains_key(*field))
                    .unwrap_or(true)
            })
            .map(|field| format!("missing required field '{field}'"))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing)
        }
    }
}

/// Registry of the tools this gateway serves.
pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
    validator: Box<dyn ArgumentValidator>,
}

impl ToolRegistry {
    /// Build a registry over the given specs with the default validator.
    pub fn new(tools: Vec<ToolSpec>) -> Self {
        Self {
            tools,
            validator: Box::new(RequiredFieldsValidator),
        }
    }

    /// Swap in a custom validation predicate.
    pub fn with_validator(mut self, validator: Box<dyn ArgumentValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// All tool specs, in registration order.
    pub fn list(&self) -> &[ToolSpec] {
        &self.tools
    }

    /// Look up one spec by name.
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Validate an arguments map against the named tool's schema.
    pub fn validate_arguments(
        &self,
        name: &str,
        arguments: Option<&serde_json::Map<String, Value>>,
    ) -> Result<(), Vec<String>> {
        match self.get(name) {
            Some(spec) => self.validator.validate(spec, arguments),
            // Unknown tools are the orchestrator's concern, not the schema's.
            None => Ok(()),
        }
    }
}

/// The built-in tool surface.
pub fn builtin_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "gemini_generate".to_string(),
            description: "Generate text with the Gemini API".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "prompt": { "type": "string", "description": "Prompt text" },
                    "model": { "type": "string", "description": "Model override" }
                },
                "required": ["prompt"]
            }),
        },
        ToolSpec {
            name: "slack_send_message".to_string(),
            description: "Post a message to a Slack channel".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "channel": { "type": "string", "description": "Channel id" },
                    "text": { "type": "string", "description": "Message text" }
                },
                "required": ["channel", "text"]
            }),
        },
        ToolSpec {
            name: "gpg_sign".to_string(),
            description: "Sign a payload with the local GPG key".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "payload": { "type": "string", "description": "Data to sign" }
                },
                "required": ["payload"]
            }),
        },
    ]
}
