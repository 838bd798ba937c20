//! Routing supervisor
//!
//! The supervisor is a model invocation constrained to a single
//! categorical output: the decision is forced through a `route` tool whose
//! only parameter is an enum over `{FINISH} ∪ worker names`, so parsing
//! never depends on free-text discipline. The decision is stateless across
//! cycles; each call sees only the conversation so far.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::agents::{FINISH, SUPERVISOR_NODE};
use crate::graph::{EventSink, RoutingDecision};
use crate::llm::{ChatModel, ChatRequest, Message, ToolDefinition};
use crate::{Error, Result};

const SYSTEM_PROMPT: &str = "You are a supervisor tasked with managing a conversation between the \
following workers: {members}. Given the following user request, respond with the worker to act \
next. Each worker will perform a task and respond with their results and status. When finished, \
respond with FINISH.";

const FOLLOW_UP_PROMPT: &str = "Given the conversation above, who should act next? Or should we \
FINISH? Select one of: {options}";

/// Supervisor: decides which node acts next
pub struct Supervisor {
    model: Arc<dyn ChatModel>,
    members: Vec<String>,
    temperature: Option<f32>,
    max_tokens: u64,
    system_prompt: String,
    follow_up_prompt: String,
}

impl Supervisor {
    pub fn new(
        model: Arc<dyn ChatModel>,
        members: Vec<String>,
        temperature: Option<f32>,
        max_tokens: u64,
    ) -> Self {
        let mut options: Vec<&str> = vec![FINISH];
        options.extend(members.iter().map(|m| m.as_str()));

        let system_prompt = SYSTEM_PROMPT.replace("{members}", &members.join(", "));
        let follow_up_prompt = FOLLOW_UP_PROMPT.replace("{options}", &options.join(", "));

        Self {
            model,
            members,
            temperature,
            max_tokens,
            system_prompt,
            follow_up_prompt,
        }
    }

    /// Names of the eligible workers
    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Decide the next actor from the conversation so far
    pub async fn decide(
        &self,
        messages: &[Message],
        sink: &EventSink,
    ) -> Result<RoutingDecision> {
        let mut prompt = Vec::with_capacity(messages.len() + 2);
        prompt.push(Message::system(&self.system_prompt));
        prompt.extend(messages.iter().cloned());
        prompt.push(Message::system(&self.follow_up_prompt));

        let request = ChatRequest {
            model: self.model.model().to_string(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: None,
            messages: prompt,
            tools: vec![self.routing_tool()],
            tool_choice: Some("route".to_string()),
        };

        let deltas = sink.scope(SUPERVISOR_NODE);
        let response = self.model.chat(request, &deltas).await?;

        let (_, _, input) = response
            .tool_uses()
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::RoutingViolation(
                    "router returned no route tool call despite forced tool choice".to_string(),
                )
            })?;

        let next = input
            .get("next")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                Error::RoutingViolation(format!(
                    "route tool call is missing the 'next' argument: {}",
                    input
                ))
            })?;

        let decision = RoutingDecision::parse(next, &self.members)?;
        debug!(next = %next, "Supervisor decision");
        Ok(decision)
    }

    /// The `route` tool: a single-field categorical schema over the
    /// eligible next actors
    fn routing_tool(&self) -> ToolDefinition {
        let mut options: Vec<&str> = vec![FINISH];
        options.extend(self.members.iter().map(|m| m.as_str()));

        ToolDefinition::new(
            "route",
            "Select the next role.",
            json!({
                "type": "object",
                "properties": {
                    "next": {
                        "type": "string",
                        "enum": options,
                    }
                },
                "required": ["next"]
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::graph::TokenSink;
    use crate::llm::{ChatResponse, ContentBlock};

    /// Mock model that returns a scripted routing token and records the
    /// request it was given
    struct MockRouter {
        next: String,
        last_request: Mutex<Option<ChatRequest>>,
    }

    impl MockRouter {
        fn selecting(next: &str) -> Self {
            Self {
                next: next.to_string(),
                last_request: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ChatModel for MockRouter {
        async fn chat(&self, request: ChatRequest, _deltas: &TokenSink) -> crate::Result<ChatResponse> {
            *self.last_request.lock().unwrap() = Some(request);
            Ok(ChatResponse {
                content: vec![ContentBlock::ToolUse {
                    id: "call_route".into(),
                    name: "route".into(),
                    input: json!({"next": self.next}),
                }],
                stop_reason: "tool_use".into(),
            })
        }

        fn model(&self) -> &str {
            "mock"
        }
    }

    fn members() -> Vec<String> {
        vec!["researcher".to_string(), "mathematician".to_string()]
    }

    #[tokio::test]
    async fn decides_worker_from_forced_tool_call() {
        let model = Arc::new(MockRouter::selecting("researcher"));
        let supervisor = Supervisor::new(model.clone(), members(), Some(0.0), 2048);

        let decision = supervisor
            .decide(&[Message::user("find rust news")], &EventSink::disabled())
            .await
            .unwrap();
        assert_eq!(decision, RoutingDecision::Act("researcher".to_string()));

        // the outbound request must force the route tool and frame the
        // conversation between the two system prompts
        let request = model.last_request.lock().unwrap().take().unwrap();
        assert_eq!(request.tool_choice.as_deref(), Some("route"));
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.tools[0].name, "route");
        assert_eq!(request.messages.len(), 3);
        assert!(request.messages[0]
            .text_content()
            .contains("researcher, mathematician"));
        assert!(request.messages[2]
            .text_content()
            .contains("FINISH, researcher, mathematician"));
    }

    #[tokio::test]
    async fn decides_finish() {
        let model = Arc::new(MockRouter::selecting("FINISH"));
        let supervisor = Supervisor::new(model, members(), None, 2048);

        let decision = supervisor
            .decide(&[Message::user("thanks, done")], &EventSink::disabled())
            .await
            .unwrap();
        assert_eq!(decision, RoutingDecision::Finish);
    }

    #[tokio::test]
    async fn rejects_out_of_set_decision() {
        let model = Arc::new(MockRouter::selecting("poet"));
        let supervisor = Supervisor::new(model, members(), None, 2048);

        let err = supervisor
            .decide(&[Message::user("write a poem")], &EventSink::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RoutingViolation(_)), "got: {err}");
    }

    #[tokio::test]
    async fn rejects_missing_route_call() {
        struct NoToolCall;

        #[async_trait]
        impl ChatModel for NoToolCall {
            async fn chat(
                &self,
                _request: ChatRequest,
                _deltas: &TokenSink,
            ) -> crate::Result<ChatResponse> {
                Ok(ChatResponse {
                    content: vec![ContentBlock::Text {
                        text: "researcher".into(),
                    }],
                    stop_reason: "end_turn".into(),
                })
            }

            fn model(&self) -> &str {
                "mock"
            }
        }

        let supervisor = Supervisor::new(Arc::new(NoToolCall), members(), None, 2048);
        let err = supervisor
            .decide(&[Message::user("hi")], &EventSink::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RoutingViolation(_)), "got: {err}");
    }
}
