//! ensemble-core: supervisor-routed multi-agent orchestration
//!
//! The orchestration core: a supervisor model routes each conversation
//! turn to one of several tool-using worker agents (or finishes the
//! turn), an execution engine owns the shared conversation state and
//! moves control between nodes, and a stream aggregator projects the
//! engine's internal events into a client-facing text stream.

pub mod agents;
pub mod config;
pub mod error;
pub mod graph;
pub mod llm;
pub mod stream;
pub mod tool;

pub use agents::{Supervisor, WorkerAgent, FINISH, SUPERVISOR_NODE};
pub use config::{Limits, LlmProvider, ModelSettings, OrchestrationConfig, WorkerDefinition};
pub use error::{Error, Result};
pub use graph::{
    ConversationState, EngineEvent, EventSink, Orchestrator, RoutingDecision, TokenSink,
    TurnOutcome, WorkerStep,
};
pub use llm::{ChatModel, ChatRequest, ChatResponse, ContentBlock, LlmClient, Message, Role, ToolDefinition};
pub use stream::text_stream;
pub use tool::{Tool, ToolRegistry, ToolResult};
