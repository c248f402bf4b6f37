//! Tool system modules and re-exports.

// === Modules ===

pub mod executor;
pub mod registry;
pub mod spec;

// === Re-exports ===

pub use executor::{CodeExecutorTool, ResetContextTool};
pub use registry::{ToolDefinition, ToolRegistry, ToolRegistryBuilder};
pub use spec::{ApprovalLevel, ToolError, ToolResult, ToolSpec};
