// Static tool trait and registry

use crate::protocol::CallToolResult;
use junction_core::types::ToolDefinition;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// A capability implemented by the gateway itself
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Definition advertised in `tools/list`
    fn schema(&self) -> ToolDefinition;

    /// Execute with arguments that already passed schema validation
    async fn execute(&self, arguments: Value) -> anyhow::Result<CallToolResult>;
}

/// Why a static tool call did not produce a result
#[derive(Debug, thiserror::Error)]
pub enum ToolCallError {
    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("Invalid arguments for {tool}: {}", .violations.join("; "))]
    InvalidArguments { tool: String, violations: Vec<String> },

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

struct Registered {
    tool: Arc<dyn Tool>,
    schema: ToolDefinition,
    validator: Option<jsonschema::Validator>,
}

/// Static tools in registration order
pub struct ToolRegistry {
    tools: Vec<Registered>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Register a tool, replacing any earlier tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        let validator = match jsonschema::validator_for(&schema.input_schema) {
            Ok(validator) => Some(validator),
            Err(e) => {
                warn!(tool = %schema.name, error = %e, "input schema does not compile, arguments will not be validated");
                None
            }
        };

        let entry = Registered {
            tool,
            schema,
            validator,
        };
        match self.by_name.get(&entry.schema.name) {
            Some(&index) => self.tools[index] = entry,
            None => {
                self.by_name.insert(entry.schema.name.clone(), self.tools.len());
                self.tools.push(entry);
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions in registration order
    pub fn list_schemas(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|entry| entry.schema.clone()).collect()
    }

    /// Validate `arguments` against the tool's input schema, then run it.
    ///
    /// Missing arguments are treated as an empty object.
    pub async fn call(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult, ToolCallError> {
        let entry = self
            .entry(name)
            .ok_or_else(|| ToolCallError::NotFound(name.to_string()))?;

        let arguments = match arguments {
            None | Some(Value::Null) => Value::Object(Default::default()),
            Some(arguments) => arguments,
        };

        if let Some(validator) = &entry.validator {
            let violations: Vec<String> = validator
                .iter_errors(&arguments)
                .map(|e| e.to_string())
                .collect();
            if !violations.is_empty() {
                return Err(ToolCallError::InvalidArguments {
                    tool: name.to_string(),
                    violations,
                });
            }
        }

        Ok(entry.tool.execute(arguments).await?)
    }

    fn entry(&self, name: &str) -> Option<&Registered> {
        self.by_name.get(name).map(|&index| &self.tools[index])
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// Helper functions for creating tool schemas

pub fn json_schema_object(properties: Value, required: Vec<&str>) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

pub fn json_schema_string(description: &str) -> Value {
    serde_json::json!({
        "type": "string",
        "description": description
    })
}

pub fn json_schema_integer(description: &str, minimum: i64, maximum: i64) -> Value {
    serde_json::json!({
        "type": "integer",
        "description": description,
        "minimum": minimum,
        "maximum": maximum
    })
}

pub fn json_schema_boolean(description: &str) -> Value {
    serde_json::json!({
        "type": "boolean",
        "description": description
    })
}

pub fn json_schema_array(items: Value, description: &str) -> Value {
    serde_json::json!({
        "type": "array",
        "items": items,
        "description": description
    })
}

pub fn json_schema_enum(values: &[&str], description: &str) -> Value {
    serde_json::json!({
        "type": "string",
        "enum": values,
        "description": description
    })
}
