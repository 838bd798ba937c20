//! LLM capability: message model, request/response types, provider client

pub mod client;
pub mod types;

pub use client::{ChatModel, LlmClient};
pub use types::{
    ChatRequest, ChatResponse, ContentBlock, Message, Role, ToolDefinition,
};
