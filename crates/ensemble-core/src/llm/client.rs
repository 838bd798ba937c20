//! LLM API HTTP client
//!
//! Supports OpenAI-compatible chat-completions APIs and the Claude
//! messages API. Every invocation consumes the provider's SSE stream so
//! text deltas reach the engine's event feed as they are generated;
//! tool-call fragments are accumulated into complete [`ContentBlock`]s and
//! produce empty deltas that the stream aggregator filters out.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::{LlmProvider, ModelSettings};
use crate::graph::TokenSink;
use crate::llm::types::{ChatRequest, ChatResponse, ContentBlock, Message, Role};
use crate::{Error, Result};

/// Opaque model capability: feed it messages and tools, get back a reply
/// or tool-call requests, with text deltas pushed to `deltas` along the way.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, request: ChatRequest, deltas: &TokenSink) -> Result<ChatResponse>;

    /// The model identifier requests should carry
    fn model(&self) -> &str;
}

/// LLM API client (OpenAI-compatible and Claude)
#[derive(Clone, Debug)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    provider: LlmProvider,
}

impl LlmClient {
    /// Create a new LLM client from model settings.
    ///
    /// Fails fast on a missing API key: a misconfigured model must never be
    /// registered into the orchestration graph.
    pub fn new(settings: &ModelSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(Error::Http)?;

        let base_url = match &settings.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => match settings.provider {
                LlmProvider::OpenAi => "https://api.openai.com/v1".to_string(),
                LlmProvider::Claude => "https://api.anthropic.com/v1".to_string(),
            },
        };

        let env_var = match settings.provider {
            LlmProvider::OpenAi => "OPENAI_API_KEY",
            LlmProvider::Claude => "ANTHROPIC_API_KEY",
        };
        let api_key = match settings.api_key.as_deref() {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => std::env::var(env_var).map_err(|_| {
                Error::Config(format!(
                    "Missing API key for model '{}': set api_key in the config or export {}",
                    settings.model, env_var
                ))
            })?,
        };

        Ok(Self {
            client,
            api_key,
            model: settings.model.clone(),
            base_url,
            provider: settings.provider,
        })
    }

    /// Get the provider type
    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    /// Send a streaming request to an OpenAI-compatible API
    async fn stream_openai(
        &self,
        request: &ChatRequest,
        deltas: &TokenSink,
    ) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = OpenAiRequest::from_chat_request(request);

        debug!("Sending streaming request to OpenAI-compatible API: {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(Error::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.map_err(Error::Http)?;
            warn!("OpenAI API error: {} - {}", status, body);
            return Err(Error::LlmApi(format!("{}: {}", status, body)));
        }

        let mut stream = response.bytes_stream();
        let mut lines = LineBuffer::default();
        let mut state = OpenAiStreamState::default();

        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(Error::Http)?;
            for line in lines.push_bytes(&chunk) {
                if state.feed_line(&line, deltas)? {
                    break 'outer;
                }
            }
        }

        Ok(state.finish())
    }

    /// Send a streaming request to the Claude messages API
    async fn stream_claude(
        &self,
        request: &ChatRequest,
        deltas: &TokenSink,
    ) -> Result<ChatResponse> {
        let url = format!("{}/messages", self.base_url);
        let body = claude_request_body(request);

        debug!("Sending streaming request to Claude API: {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(Error::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.map_err(Error::Http)?;
            warn!("Claude API error: {} - {}", status, body);
            return Err(Error::LlmApi(format!("{}: {}", status, body)));
        }

        let mut stream = response.bytes_stream();
        let mut lines = LineBuffer::default();
        let mut state = ClaudeStreamState::default();

        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(Error::Http)?;
            for line in lines.push_bytes(&chunk) {
                if state.feed_line(&line, deltas)? {
                    break 'outer;
                }
            }
        }

        Ok(state.finish())
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn chat(&self, request: ChatRequest, deltas: &TokenSink) -> Result<ChatResponse> {
        match self.provider {
            LlmProvider::OpenAi => self.stream_openai(&request, deltas).await,
            LlmProvider::Claude => self.stream_claude(&request, deltas).await,
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Shared stream plumbing
// ============================================================================

/// Byte-accurate line splitter for SSE bodies.
///
/// Buffers raw bytes so a multi-byte UTF-8 character split across two
/// network chunks never gets mangled; decoding happens per complete line.
#[derive(Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push_bytes(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());
        }
        lines
    }
}

/// Normalize provider finish reasons onto the Claude vocabulary the rest
/// of the crate dispatches on
fn normalize_stop_reason(reason: Option<&str>, has_tool_calls: bool) -> String {
    match reason {
        Some("stop") | Some("stop_sequence") | Some("end_turn") => "end_turn".to_string(),
        Some("tool_calls") | Some("tool_use") => "tool_use".to_string(),
        Some(other) => other.to_string(),
        None => {
            if has_tool_calls {
                "tool_use".to_string()
            } else {
                "end_turn".to_string()
            }
        }
    }
}

// ============================================================================
// OpenAI-compatible wire format
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OpenAiMessage {
    fn plain(role: &str, name: Option<String>, content: String) -> Self {
        Self {
            role: role.to_string(),
            name,
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

impl OpenAiRequest {
    fn from_chat_request(request: &ChatRequest) -> Self {
        let mut messages = Vec::new();

        if let Some(system) = &request.system {
            messages.push(OpenAiMessage::plain("system", None, system.clone()));
        }

        for msg in &request.messages {
            messages.extend(convert_message_openai(msg));
        }

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.input_schema,
                            }
                        })
                    })
                    .collect(),
            )
        };

        let tool_choice = request
            .tool_choice
            .as_ref()
            .map(|name| json!({"type": "function", "function": {"name": name}}));

        Self {
            model: request.model.clone(),
            messages,
            stream: true,
            temperature: request.temperature,
            max_tokens: Some(request.max_tokens),
            tools,
            tool_choice,
        }
    }
}

/// Convert one internal message into its OpenAI wire form.
///
/// Tool results expand into one `tool`-role message per block; a message
/// carrying tool-use blocks becomes an assistant message with `tool_calls`.
fn convert_message_openai(msg: &Message) -> Vec<OpenAiMessage> {
    let tool_results: Vec<_> = msg
        .content
        .iter()
        .filter_map(|c| {
            if let ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } = c
            {
                Some((tool_use_id.clone(), content.clone()))
            } else {
                None
            }
        })
        .collect();

    if !tool_results.is_empty() {
        return tool_results
            .into_iter()
            .map(|(id, content)| OpenAiMessage {
                role: "tool".to_string(),
                name: None,
                content: Some(content),
                tool_calls: None,
                tool_call_id: Some(id),
            })
            .collect();
    }

    if msg.has_tool_use() {
        let tool_calls: Vec<Value> = msg
            .content
            .iter()
            .filter_map(|c| {
                if let ContentBlock::ToolUse { id, name, input } = c {
                    Some(json!({
                        "id": id,
                        "type": "function",
                        "function": {
                            "name": name,
                            "arguments": input.to_string(),
                        }
                    }))
                } else {
                    None
                }
            })
            .collect();

        let text = msg.text_content();
        return vec![OpenAiMessage {
            role: "assistant".to_string(),
            name: None,
            content: if text.is_empty() { None } else { Some(text) },
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }];
    }

    vec![OpenAiMessage::plain(
        msg.role.as_str(),
        msg.name.clone(),
        msg.text_content(),
    )]
}

#[derive(Debug, Deserialize)]
struct OpenAiChunk {
    #[serde(default)]
    choices: Vec<OpenAiChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChunkChoice {
    #[serde(default)]
    delta: OpenAiChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChunkToolCall {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAiChunkFunction>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiChunkFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates OpenAI stream chunks into a complete response
#[derive(Default)]
struct OpenAiStreamState {
    content: String,
    calls: BTreeMap<usize, PartialToolCall>,
    finish_reason: Option<String>,
}

impl OpenAiStreamState {
    /// Feed one SSE line; returns `true` once the stream signalled `[DONE]`
    fn feed_line(&mut self, line: &str, deltas: &TokenSink) -> Result<bool> {
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(false);
        };
        let data = data.trim();
        if data == "[DONE]" {
            return Ok(true);
        }

        let chunk: OpenAiChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Skipping malformed stream chunk: {}", e);
                return Ok(false);
            }
        };

        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(false);
        };

        if let Some(text) = choice.delta.content {
            if !text.is_empty() {
                self.content.push_str(&text);
                deltas.push(&text);
            }
        }

        if let Some(tool_calls) = choice.delta.tool_calls {
            // Tool-call scaffolding carries no user-visible text; the event
            // still flows so the aggregator's filter is exercised.
            deltas.push("");
            for tc in tool_calls {
                let entry = self.calls.entry(tc.index).or_default();
                if let Some(id) = tc.id {
                    entry.id = id;
                }
                if let Some(function) = tc.function {
                    if let Some(name) = function.name {
                        entry.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        entry.arguments.push_str(&arguments);
                    }
                }
            }
        }

        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
        }

        Ok(false)
    }

    fn finish(self) -> ChatResponse {
        let mut content = Vec::new();
        if !self.content.is_empty() {
            content.push(ContentBlock::Text { text: self.content });
        }

        let has_tool_calls = !self.calls.is_empty();
        for (index, call) in self.calls {
            let input: Value = if call.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&call.arguments).unwrap_or(Value::Null)
            };
            let id = if call.id.is_empty() {
                format!("call_{}", index)
            } else {
                call.id
            };
            content.push(ContentBlock::ToolUse {
                id,
                name: call.name,
                input,
            });
        }

        ChatResponse {
            content,
            stop_reason: normalize_stop_reason(self.finish_reason.as_deref(), has_tool_calls),
        }
    }
}

// ============================================================================
// Claude wire format
// ============================================================================

/// Build the Claude messages API request body.
///
/// Claude has a single system slot; inline system messages fold into it.
fn claude_request_body(request: &ChatRequest) -> Value {
    let mut system_parts = Vec::new();
    if let Some(system) = &request.system {
        system_parts.push(system.clone());
    }

    let mut messages = Vec::new();
    for msg in &request.messages {
        if msg.role == Role::System {
            system_parts.push(msg.text_content());
            continue;
        }
        messages.push(json!({
            "role": msg.role.as_str(),
            "content": msg.content,
        }));
    }

    let mut body = json!({
        "model": request.model,
        "max_tokens": request.max_tokens,
        "stream": true,
        "messages": messages,
    });

    if !system_parts.is_empty() {
        body["system"] = json!(system_parts.join("\n\n"));
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if !request.tools.is_empty() {
        body["tools"] = json!(request.tools);
    }
    if let Some(name) = &request.tool_choice {
        body["tool_choice"] = json!({"type": "tool", "name": name});
    }

    body
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeEvent {
    MessageStart,
    ContentBlockStart {
        index: usize,
        content_block: ClaudeBlockStart,
    },
    ContentBlockDelta {
        index: usize,
        delta: ClaudeDelta,
    },
    ContentBlockStop,
    MessageDelta {
        #[serde(default)]
        delta: ClaudeMessageDelta,
    },
    MessageStop,
    Ping,
    Error {
        error: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ClaudeBlockStart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Default, Deserialize)]
struct ClaudeMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

enum ClaudeBlockAccum {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
}

/// Accumulates Claude stream events into a complete response
#[derive(Default)]
struct ClaudeStreamState {
    blocks: BTreeMap<usize, ClaudeBlockAccum>,
    stop_reason: Option<String>,
}

impl ClaudeStreamState {
    /// Feed one SSE line; returns `true` on `message_stop`
    fn feed_line(&mut self, line: &str, deltas: &TokenSink) -> Result<bool> {
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(false);
        };

        let event: ClaudeEvent = match serde_json::from_str(data.trim()) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping malformed stream event: {}", e);
                return Ok(false);
            }
        };

        match event {
            ClaudeEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                let accum = match content_block.kind.as_str() {
                    "tool_use" => ClaudeBlockAccum::ToolUse {
                        id: content_block.id,
                        name: content_block.name,
                        input_json: String::new(),
                    },
                    _ => ClaudeBlockAccum::Text(content_block.text),
                };
                self.blocks.insert(index, accum);
            }
            ClaudeEvent::ContentBlockDelta { index, delta } => match delta {
                ClaudeDelta::TextDelta { text } => {
                    if let Some(ClaudeBlockAccum::Text(buf)) = self.blocks.get_mut(&index) {
                        buf.push_str(&text);
                    }
                    if !text.is_empty() {
                        deltas.push(&text);
                    }
                }
                ClaudeDelta::InputJsonDelta { partial_json } => {
                    if let Some(ClaudeBlockAccum::ToolUse { input_json, .. }) =
                        self.blocks.get_mut(&index)
                    {
                        input_json.push_str(&partial_json);
                    }
                    deltas.push("");
                }
                ClaudeDelta::Unknown => {}
            },
            ClaudeEvent::MessageDelta { delta } => {
                if let Some(reason) = delta.stop_reason {
                    self.stop_reason = Some(reason);
                }
            }
            ClaudeEvent::MessageStop => return Ok(true),
            ClaudeEvent::Error { error } => {
                return Err(Error::LlmApi(format!("stream error: {}", error)));
            }
            ClaudeEvent::MessageStart
            | ClaudeEvent::ContentBlockStop
            | ClaudeEvent::Ping
            | ClaudeEvent::Unknown => {}
        }

        Ok(false)
    }

    fn finish(self) -> ChatResponse {
        let mut content = Vec::new();
        let mut has_tool_calls = false;

        for (_, accum) in self.blocks {
            match accum {
                ClaudeBlockAccum::Text(text) => {
                    if !text.is_empty() {
                        content.push(ContentBlock::Text { text });
                    }
                }
                ClaudeBlockAccum::ToolUse {
                    id,
                    name,
                    input_json,
                } => {
                    has_tool_calls = true;
                    let input: Value = if input_json.trim().is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(&input_json).unwrap_or(Value::Null)
                    };
                    content.push(ContentBlock::ToolUse { id, name, input });
                }
            }
        }

        ChatResponse {
            content,
            stop_reason: normalize_stop_reason(self.stop_reason.as_deref(), has_tool_calls),
        }
    }
}
