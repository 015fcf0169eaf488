// MCP tool trait and registry

use crate::context::InvocationContext;
use crate::protocol::{CallToolResult, ToolSchema};
use crate::quality::QualityReport;
use crate::schema::{public_schema, ArgumentValidator};
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// A named, schema-described operation exposed to callers.
///
/// Only `schema` and `execute` are mandatory. The dispatcher always runs
/// `before_execute`, `execute`, `after_execute`, then `validate`, in that
/// order, so a tool overrides just the hooks it needs.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool schema for MCP
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with validated arguments
    async fn execute(&self, ctx: &InvocationContext, arguments: serde_json::Value) -> Result<CallToolResult>;

    async fn before_execute(&self, _ctx: &InvocationContext, _arguments: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    async fn after_execute(
        &self,
        _ctx: &InvocationContext,
        _arguments: &serde_json::Value,
        _result: &CallToolResult,
    ) -> Result<()> {
        Ok(())
    }

    /// Quality gate over the handler's own output. `None` means the tool
    /// declares no gate.
    async fn validate(
        &self,
        _ctx: &InvocationContext,
        _arguments: &serde_json::Value,
        _result: &CallToolResult,
    ) -> Result<Option<QualityReport>> {
        Ok(None)
    }
}

/// Tool registry for managing available tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    validators: HashMap<String, ArgumentValidator>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            validators: HashMap::new(),
        }
    }

    /// Register a tool. Names are globally unique and the input schema
    /// must compile.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let schema = tool.schema();
        let name = schema.name;
        if name.is_empty() {
            bail!("Tool name must not be empty");
        }
        if self.tools.contains_key(&name) {
            bail!("Tool already registered: {}", name);
        }

        let validator = ArgumentValidator::compile(&schema.input_schema)
            .with_context(|| format!("Failed to register tool {}", name))?;
        self.validators.insert(name.clone(), validator);
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Compiled input validator for a registered tool
    pub fn validator(&self, name: &str) -> Option<&ArgumentValidator> {
        self.validators.get(name)
    }

    /// Public schemas of every tool, sorted by name
    pub fn list_schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|tool| {
                let schema = tool.schema();
                ToolSchema {
                    input_schema: public_schema(&schema.input_schema),
                    ..schema
                }
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Check if a tool exists
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// Helper functions for creating tool schemas

pub fn json_schema_object(properties: serde_json::Value, required: Vec<&str>) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

pub fn json_schema_string(description: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "string",
        "description": description
    })
}

pub fn json_schema_array(items: serde_json::Value, description: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "array",
        "items": items,
        "description": description
    })
}
