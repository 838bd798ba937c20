//! Tool system
//!
//! Workers invoke external capabilities (search, lookup, computation)
//! through the [`Tool`] trait; the [`ToolRegistry`] maps configured tool
//! identifiers to instances and rejects unknown identifiers at startup.

pub mod registry;
pub mod traits;

pub use registry::ToolRegistry;
pub use traits::{Tool, ToolResult};
