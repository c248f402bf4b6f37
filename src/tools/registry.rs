//! Tool registry for managing and executing tools.
//!
//! The registry provides:
//! - Dynamic tool registration
//! - Tool lookup by name
//! - Conversion to the definition format sent to a model

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::session::SharedSession;

use super::spec::{ApprovalLevel, ToolError, ToolResult, ToolSpec};

// === Types ===

/// Tool description as presented to a model or front end.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub approval: ApprovalLevel,
    pub read_only: bool,
}

/// Registry that holds all available tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolSpec>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool in the registry.
    pub fn register(&mut self, tool: Arc<dyn ToolSpec>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!("Overwriting existing tool: {}", name);
        }
    }

    /// Get a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolSpec>> {
        self.tools.get(name).cloned()
    }

    /// Get all registered tool names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Execute a tool by name, returning only the observation text.
    pub async fn execute(&self, name: &str, input: Value) -> Result<String, ToolError> {
        let result = self.execute_full(name, input).await?;
        Ok(result.content)
    }

    /// Execute a tool by name, returning the full `ToolResult`.
    pub async fn execute_full(&self, name: &str, input: Value) -> Result<ToolResult, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::not_available(format!("tool '{name}' is not registered")))?;

        tracing::debug!(tool = name, "Executing tool");
        let result = tool.execute(input).await?;
        if !result.success {
            tracing::warn!(tool = name, metadata = ?result.metadata, "Tool reported failure");
        }
        Ok(result)
    }

    /// Definitions of every tool, sorted by name.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.names()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
                approval: tool.approval_level(),
                read_only: tool.is_read_only(),
            })
            .collect()
    }
}

/// Builder for constructing a `ToolRegistry`.
pub struct ToolRegistryBuilder {
    tools: Vec<Arc<dyn ToolSpec>>,
}

impl ToolRegistryBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Add a custom tool.
    #[must_use]
    pub fn with_tool(mut self, tool: Arc<dyn ToolSpec>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Include the code executor and reset tools over one shared session.
    #[must_use]
    pub fn with_session_tools(self, session: SharedSession) -> Self {
        use super::executor::{CodeExecutorTool, ResetContextTool};

        self.with_tool(Arc::new(CodeExecutorTool::new(session.clone())))
            .with_tool(Arc::new(ResetContextTool::new(session)))
    }

    #[must_use]
    pub fn build(self) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for tool in self.tools {
            registry.register(tool);
        }
        registry
    }
}

impl Default for ToolRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// === Unit Tests ===
