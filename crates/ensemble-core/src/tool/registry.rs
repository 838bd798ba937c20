//! Tool registry: configured identifier → capability instance

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::llm::ToolDefinition;
use crate::tool::{Tool, ToolResult};
use crate::{Error, Result};

/// Registry of available tools, shared by every worker
pub struct ToolRegistry {
    /// Registered tools indexed by name
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool.
    ///
    /// If a tool with the same name already exists, it will be replaced.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Resolve configured tool identifiers into model-facing definitions.
    ///
    /// An identifier with no registered tool is a configuration error; a
    /// worker referencing one must fail at construction time, never at
    /// dispatch time.
    pub fn definitions_for(&self, names: &[String]) -> Result<Vec<ToolDefinition>> {
        names
            .iter()
            .map(|name| {
                self.tools
                    .get(name)
                    .map(|t| ToolDefinition::new(t.name(), t.description(), t.input_schema()))
                    .ok_or_else(|| Error::Config(format!("Unknown tool identifier: {}", name)))
            })
            .collect()
    }

    /// Execute a tool by name
    pub async fn execute(&self, name: &str, input: JsonValue) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::ToolExecution(format!("Unknown tool: {}", name)))?;
        tool.execute(input).await
    }

    /// Check if a tool is registered
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get the number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if no tools are registered
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Get all registered tool names
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
