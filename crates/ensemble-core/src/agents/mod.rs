//! Agents: the routing supervisor and the tool-using workers
//!
//! The supervisor looks at the whole conversation and emits one
//! categorical decision: the name of the worker to act next, or `FINISH`.
//! A worker wraps a model, a system instruction, and a fixed toolset, and
//! produces exactly one reply message per activation. Neither side talks
//! to the other directly; the execution engine in [`crate::graph`] owns
//! the state and moves control between them.

pub mod supervisor;
pub mod worker;

/// Routing token that terminates the turn
pub const FINISH: &str = "FINISH";

/// Node name of the supervisor in the event feed
pub const SUPERVISOR_NODE: &str = "supervisor";

pub use supervisor::Supervisor;
pub use worker::{ToolCallRecord, WorkerAgent, WorkerReply};
