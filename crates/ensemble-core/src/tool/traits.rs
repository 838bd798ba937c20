//! Tool trait definition

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::Result;

/// Tool execution result
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Output string from tool execution
    pub output: String,
    /// Whether the execution resulted in an error
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful tool result
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    /// Create an error tool result
    pub fn error(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: true,
        }
    }
}

/// An invocable capability a worker may call mid-reasoning.
///
/// Implementations must be safe for concurrent independent use: one
/// instance is shared across all requests that reference its identifier.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used as the identifier in worker configuration and in
    /// the definitions advertised to the model)
    fn name(&self) -> &str;

    /// Tool description (shown to the model when selecting tools)
    fn description(&self) -> &str;

    /// JSON schema for the tool's input parameters
    fn input_schema(&self) -> JsonValue;

    /// Execute the tool with the given input
    async fn execute(&self, input: JsonValue) -> Result<ToolResult>;
}
