//! ensemble-tools: Built-in tools for ensemble workers
//!
//! Web search, encyclopedia lookup, and arithmetic — the capabilities a
//! worker definition can reference by identifier.

use ensemble_core::ToolRegistry;

pub mod calculator;
pub mod web_search;
pub mod wikipedia;

pub use calculator::CalculatorTool;
pub use web_search::WebSearchTool;
pub use wikipedia::WikipediaTool;

use std::sync::Arc;

/// Register all default built-in tools with the tool registry
pub fn register_default_tools(registry: &mut ToolRegistry) {
    registry.register(Arc::new(WebSearchTool::new()));
    registry.register(Arc::new(WikipediaTool::new()));
    registry.register(Arc::new(CalculatorTool));
}
