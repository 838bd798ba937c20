//! Worker agent
//!
//! A worker wraps a model, a system instruction, and a fixed toolset. One
//! activation runs a bounded reasoning loop: invoke the model; when it
//! requests tool calls, execute them through the registry, feed the
//! results back, and invoke again; when it produces plain text, that text
//! becomes the worker's single reply message. A tool failure is fed back
//! to the model as an error result so it can retry, switch tools, or
//! answer without; it never fails the worker itself.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::config::{Limits, WorkerDefinition};
use crate::graph::EventSink;
use crate::llm::{ChatModel, ChatRequest, ContentBlock, Message, Role, ToolDefinition};
use crate::tool::{ToolRegistry, ToolResult};
use crate::{Error, Result};

const INCOMPLETE_FALLBACK: &str =
    "I was unable to finish this task within the allotted tool budget; the partial findings so \
far are recorded above.";

/// Record of one tool call made during a worker execution
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub input: JsonValue,
    pub output: String,
    pub is_error: bool,
}

/// The state delta a worker hands back to the engine
#[derive(Debug)]
pub struct WorkerReply {
    /// Exactly one new message, tagged with this worker's name
    pub message: Message,
    /// True when the iteration cap cut the reasoning loop short
    pub truncated: bool,
    /// Tool actions taken while producing the reply, in execution order
    pub tool_calls: Vec<ToolCallRecord>,
}

/// A model-backed agent bound to a fixed toolset and instruction
pub struct WorkerAgent {
    name: String,
    system_message: String,
    model: Arc<dyn ChatModel>,
    temperature: Option<f32>,
    tools: Vec<ToolDefinition>,
    registry: Arc<ToolRegistry>,
    max_iterations: usize,
    max_tokens: u64,
}

impl std::fmt::Debug for WorkerAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerAgent")
            .field("name", &self.name)
            .field("system_message", &self.system_message)
            .field("temperature", &self.temperature)
            .field("tools", &self.tools)
            .field("max_iterations", &self.max_iterations)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

impl WorkerAgent {
    /// Construct a worker from its definition.
    ///
    /// Tool identifiers are resolved against the registry here, so a
    /// definition referencing an unknown tool can never be registered into
    /// the graph.
    pub fn new(
        definition: &WorkerDefinition,
        model: Arc<dyn ChatModel>,
        registry: Arc<ToolRegistry>,
        limits: &Limits,
    ) -> Result<Self> {
        let tools = registry.definitions_for(&definition.tools)?;

        Ok(Self {
            name: definition.name.clone(),
            system_message: definition.system_message.clone(),
            model,
            temperature: definition.model.temperature,
            tools,
            registry,
            max_iterations: limits.max_tool_iterations,
            max_tokens: limits.max_tokens,
        })
    }

    /// Bare constructor for injected collaborators (tests, embedding)
    pub fn with_parts(
        name: impl Into<String>,
        system_message: impl Into<String>,
        model: Arc<dyn ChatModel>,
        tools: Vec<ToolDefinition>,
        registry: Arc<ToolRegistry>,
        max_iterations: usize,
        max_tokens: u64,
    ) -> Self {
        Self {
            name: name.into(),
            system_message: system_message.into(),
            model,
            temperature: None,
            tools,
            registry,
            max_iterations,
            max_tokens,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute one activation against a read-only view of the conversation.
    ///
    /// Returns the reply to append; the engine applies it. The worker never
    /// mutates shared state itself.
    pub async fn run(&self, history: &[Message], sink: &EventSink) -> Result<WorkerReply> {
        let deltas = sink.scope(&self.name);

        let mut conversation = history.to_vec();
        let mut records = Vec::new();
        let mut partial_text = String::new();

        for iteration in 1..=self.max_iterations {
            let request = ChatRequest {
                model: self.model.model().to_string(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                system: Some(self.system_message.clone()),
                messages: conversation.clone(),
                tools: self.tools.clone(),
                tool_choice: None,
            };

            let response = self.model.chat(request, &deltas).await?;

            match response.stop_reason.as_str() {
                "end_turn" => {
                    let text = response.text();
                    info!(
                        worker = %self.name,
                        iterations = iteration,
                        tool_calls = records.len(),
                        "Worker finished"
                    );
                    return Ok(WorkerReply {
                        message: Message::worker(&self.name, text),
                        truncated: false,
                        tool_calls: records,
                    });
                }
                "tool_use" => {
                    let uses = response.tool_uses();
                    if uses.is_empty() {
                        warn!(worker = %self.name, "tool_use stop reason but no tool calls");
                        continue;
                    }

                    // Text produced alongside tool calls is the best partial
                    // answer should the loop get cut short.
                    let text = response.text();
                    if !text.is_empty() {
                        partial_text = text;
                    }

                    let mut tool_results = Vec::new();
                    for (id, name, input) in &uses {
                        debug!(worker = %self.name, tool = %name, "Executing tool");

                        let result = self
                            .registry
                            .execute(name, input.clone())
                            .await
                            .unwrap_or_else(|e| ToolResult::error(e.to_string()));

                        records.push(ToolCallRecord {
                            id: id.clone(),
                            name: name.clone(),
                            input: input.clone(),
                            output: result.output.clone(),
                            is_error: result.is_error,
                        });

                        tool_results.push(ContentBlock::ToolResult {
                            tool_use_id: id.clone(),
                            content: result.output,
                            is_error: result.is_error,
                        });
                    }

                    conversation.push(Message::from_blocks(Role::Assistant, response.content));
                    conversation.push(Message::from_blocks(Role::User, tool_results));
                }
                other => {
                    return Err(Error::LlmApi(format!(
                        "unexpected stop reason from model: {}",
                        other
                    )));
                }
            }
        }

        // Iteration cap hit: degrade to the best partial answer instead of
        // looping forever or dropping the reply.
        warn!(
            worker = %self.name,
            max_iterations = self.max_iterations,
            "Worker hit its tool iteration cap"
        );
        let text = if partial_text.is_empty() {
            INCOMPLETE_FALLBACK.to_string()
        } else {
            partial_text
        };
        Ok(WorkerReply {
            message: Message::worker(&self.name, text),
            truncated: true,
            tool_calls: records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    use crate::graph::TokenSink;
    use crate::llm::ChatResponse;
    use crate::tool::Tool;

    /// Mock model that plays back a fixed sequence of responses
    struct ScriptedModel {
        responses: Mutex<Vec<ChatResponse>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<ChatResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }

        fn text(text: &str) -> ChatResponse {
            ChatResponse {
                content: vec![ContentBlock::Text { text: text.into() }],
                stop_reason: "end_turn".into(),
            }
        }

        fn tool_call(id: &str, name: &str, input: JsonValue) -> ChatResponse {
            ChatResponse {
                content: vec![ContentBlock::ToolUse {
                    id: id.into(),
                    name: name.into(),
                    input,
                }],
                stop_reason: "tool_use".into(),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn chat(
            &self,
            _request: ChatRequest,
            _deltas: &TokenSink,
        ) -> crate::Result<ChatResponse> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                // scripts that run dry keep requesting the same tool
                return Ok(Self::tool_call("call_n", "flaky", json!({})));
            }
            Ok(responses.remove(0))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    struct AdderTool;

    #[async_trait]
    impl Tool for AdderTool {
        fn name(&self) -> &str {
            "adder"
        }

        fn description(&self) -> &str {
            "Adds a and b"
        }

        fn input_schema(&self) -> JsonValue {
            json!({"type": "object", "properties": {"a": {"type": "number"}, "b": {"type": "number"}}})
        }

        async fn execute(&self, input: JsonValue) -> crate::Result<ToolResult> {
            let a = input.get("a").and_then(|v| v.as_i64()).unwrap_or(0);
            let b = input.get("b").and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(ToolResult::success((a + b).to_string()))
        }
    }

    struct FlakyTool;

    #[async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &str {
            "flaky"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn input_schema(&self) -> JsonValue {
            json!({"type": "object"})
        }

        async fn execute(&self, _input: JsonValue) -> crate::Result<ToolResult> {
            Err(Error::ToolExecution("upstream service unavailable".into()))
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(AdderTool));
        registry.register(Arc::new(FlakyTool));
        Arc::new(registry)
    }

    fn worker(model: ScriptedModel, max_iterations: usize) -> WorkerAgent {
        let registry = registry();
        let tools = registry
            .definitions_for(&["adder".to_string(), "flaky".to_string()])
            .unwrap();
        WorkerAgent::with_parts(
            "mathematician",
            "You solve math problems.",
            Arc::new(model),
            tools,
            registry,
            max_iterations,
            1024,
        )
    }

    #[tokio::test]
    async fn plain_reply_needs_one_iteration() {
        let model = ScriptedModel::new(vec![ScriptedModel::text("The answer is 4.")]);
        let reply = worker(model, 8)
            .run(&[Message::user("2+2?")], &EventSink::disabled())
            .await
            .unwrap();

        assert_eq!(reply.message.text_content(), "The answer is 4.");
        assert_eq!(reply.message.name.as_deref(), Some("mathematician"));
        assert_eq!(reply.message.role, Role::User);
        assert!(!reply.truncated);
        assert!(reply.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn tool_loop_feeds_results_back() {
        let model = ScriptedModel::new(vec![
            ScriptedModel::tool_call("call_1", "adder", json!({"a": 2, "b": 2})),
            ScriptedModel::text("2 + 2 = 4"),
        ]);
        let reply = worker(model, 8)
            .run(&[Message::user("2+2?")], &EventSink::disabled())
            .await
            .unwrap();

        assert_eq!(reply.message.text_content(), "2 + 2 = 4");
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].name, "adder");
        assert_eq!(reply.tool_calls[0].output, "4");
        assert!(!reply.tool_calls[0].is_error);
    }

    #[tokio::test]
    async fn tool_failure_is_fed_back_not_fatal() {
        let model = ScriptedModel::new(vec![
            ScriptedModel::tool_call("call_1", "flaky", json!({})),
            ScriptedModel::text("The tool is down; based on what I know, the answer is 4."),
        ]);
        let reply = worker(model, 8)
            .run(&[Message::user("2+2?")], &EventSink::disabled())
            .await
            .unwrap();

        // the reply still reaches the caller, carrying the fallback path
        assert!(reply.message.text_content().contains("the answer is 4"));
        assert_eq!(reply.tool_calls.len(), 1);
        assert!(reply.tool_calls[0].is_error);
        assert!(reply.tool_calls[0].output.contains("unavailable"));
    }

    #[tokio::test]
    async fn iteration_cap_degrades_to_truncated_reply() {
        // the script never yields a text stop, so the cap must cut it
        let model = ScriptedModel::new(vec![]);
        let reply = worker(model, 3)
            .run(&[Message::user("loop forever")], &EventSink::disabled())
            .await
            .unwrap();

        assert!(reply.truncated);
        assert_eq!(reply.message.text_content(), INCOMPLETE_FALLBACK);
        assert_eq!(reply.tool_calls.len(), 3);
    }

    #[tokio::test]
    async fn unknown_tool_identifier_fails_at_construction() {
        let definition = WorkerDefinition {
            name: "researcher".into(),
            system_message: "Research things.".into(),
            tools: vec!["no_such_tool".into()],
            model: Default::default(),
        };
        let err = WorkerAgent::new(
            &definition,
            Arc::new(ScriptedModel::new(vec![])),
            registry(),
            &Limits::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got: {err}");
    }
}
