//! The tool abstraction an agent loop drives the session through.
//!
//! A tool has a name, a model-facing description, a JSON Schema for its
//! input and a set of capabilities from which its approval policy follows.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// What running a tool can do to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolCapability {
    ReadOnly,
    /// Changes session state (namespace or history)
    MutatesState,
    /// Runs user-supplied code or shell commands
    ExecutesCode,
    RequiresApproval,
}

/// How much confirmation a front end should ask for before running a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalLevel {
    #[default]
    Auto,
    Suggest,
    Required,
}

/// A call that could not be dispatched or completed.
///
/// Failures of the submitted code itself are not tool errors; they come back
/// as an unsuccessful [`ToolResult`] carrying the observation.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Failed to validate input: missing required field '{field}'")]
    MissingField { field: String },

    #[error("Failed to execute tool: {message}")]
    ExecutionFailed { message: String },

    #[error("Failed to locate tool: {message}")]
    NotAvailable { message: String },
}

impl ToolError {
    #[must_use]
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    #[must_use]
    pub fn execution_failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            message: msg.into(),
        }
    }

    #[must_use]
    pub fn not_available(msg: impl Into<String>) -> Self {
        Self::NotAvailable {
            message: msg.into(),
        }
    }
}

/// Observation returned to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    /// False when the observation describes a failure of the session itself.
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResult {
    #[must_use]
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: true,
            metadata: None,
        }
    }

    #[must_use]
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: false,
            metadata: None,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[async_trait]
pub trait ToolSpec: Send + Sync {
    /// Name the model calls the tool by.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the input object.
    fn input_schema(&self) -> Value;

    fn capabilities(&self) -> Vec<ToolCapability>;

    /// Explicit approval wins over state mutation; everything else is automatic.
    fn approval_level(&self) -> ApprovalLevel {
        let caps = self.capabilities();
        if caps.contains(&ToolCapability::RequiresApproval) {
            ApprovalLevel::Required
        } else if caps.contains(&ToolCapability::MutatesState) {
            ApprovalLevel::Suggest
        } else {
            ApprovalLevel::Auto
        }
    }

    fn is_read_only(&self) -> bool {
        let caps = self.capabilities();
        caps.contains(&ToolCapability::ReadOnly)
            && !caps.contains(&ToolCapability::MutatesState)
            && !caps.contains(&ToolCapability::ExecutesCode)
    }

    async fn execute(&self, input: Value) -> Result<ToolResult, ToolError>;
}

/// String field `field` of a tool input object.
pub fn required_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::missing_field(field))
}
