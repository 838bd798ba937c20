//! Orchestration graph: shared state, event feed, and the execution engine

pub mod engine;
pub mod events;
pub mod state;

pub use engine::{Orchestrator, TurnOutcome, WorkerStep};
pub use events::{EngineEvent, EventSink, TokenSink};
pub use state::{ConversationState, RoutingDecision};
