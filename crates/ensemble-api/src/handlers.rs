//! HTTP API handlers
//!
//! The orchestration endpoint accepts a message history and either streams
//! the conversation's text deltas as they are produced, or runs the turn
//! to completion and returns the full message list with a step-by-step
//! tool trace.

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use ensemble_core::{text_stream, EventSink, Message, WorkerStep};

use crate::error::{ApiError, Result};
use crate::server::AppState;

// ============================================================================
// Request/Response types
// ============================================================================

/// One inbound chat message
#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub role: String,
    pub content: String,
}

/// Orchestration request payload
#[derive(Debug, Deserialize)]
pub struct OrchestrationRequest {
    /// Prior conversation, oldest first
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
    /// Return the full trace instead of streaming text
    #[serde(default)]
    pub show_intermediate_steps: bool,
}

/// One outbound chat message
#[derive(Debug, Serialize)]
pub struct OutboundMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub content: String,
}

impl From<&Message> for OutboundMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.as_str().to_string(),
            name: msg.name.clone(),
            content: msg.text_content(),
        }
    }
}

/// Full-trace response for `show_intermediate_steps`
#[derive(Debug, Serialize)]
pub struct TraceResponse {
    pub messages: Vec<OutboundMessage>,
    pub truncated: bool,
    pub hops: usize,
    pub steps: Vec<WorkerStep>,
    pub created_at: String,
}

// ============================================================================
// Handler functions
// ============================================================================

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}

/// Orchestration endpoint: route the conversation through the supervisor
/// and its workers
pub async fn orchestrate(
    State(state): State<AppState>,
    Json(request): Json<OrchestrationRequest>,
) -> Result<Response> {
    let request_id = uuid::Uuid::new_v4();
    debug!(%request_id, messages = request.messages.len(), "Orchestration request");

    // the boundary only admits user and assistant roles
    let inbound: Vec<Message> = request
        .messages
        .iter()
        .filter_map(|m| match m.role.as_str() {
            "user" => Some(Message::user(&m.content)),
            "assistant" => Some(Message::assistant(&m.content)),
            _ => None,
        })
        .collect();

    if inbound.is_empty() {
        return Err(ApiError::InvalidRequest(
            "no user or assistant messages in request".to_string(),
        ));
    }

    if request.show_intermediate_steps {
        let outcome = state
            .orchestrator
            .run(inbound, &EventSink::disabled())
            .await?;

        info!(
            %request_id,
            hops = outcome.hops,
            truncated = outcome.truncated,
            "Orchestration turn complete"
        );

        let payload = TraceResponse {
            messages: outcome.messages.iter().map(OutboundMessage::from).collect(),
            truncated: outcome.truncated,
            hops: outcome.hops,
            steps: outcome.steps,
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        return Ok(Json(payload).into_response());
    }

    // Streaming mode: run the engine in the background and hand the
    // aggregated text stream to the client. Dropping the response body
    // closes the channel, which the engine observes and stops scheduling.
    let (sink, receiver) = EventSink::channel();
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        match orchestrator.run(inbound, &sink).await {
            Ok(outcome) => {
                info!(
                    %request_id,
                    hops = outcome.hops,
                    truncated = outcome.truncated,
                    "Orchestration turn complete"
                );
            }
            Err(e) => {
                error!(%request_id, error = %e, "Orchestration turn failed");
            }
        }
    });

    let body = Body::from_stream(
        text_stream(receiver).map(|fragment| Ok::<_, std::convert::Infallible>(fragment)),
    );

    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response())
}
