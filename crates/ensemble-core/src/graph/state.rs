//! Shared conversation state

use crate::agents::FINISH;
use crate::llm::Message;
use crate::{Error, Result};

/// The supervisor's categorical choice of what happens next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Terminate the turn
    Finish,
    /// Hand control to the named worker
    Act(String),
}

impl RoutingDecision {
    /// Validate a raw routing token against the eligible set.
    ///
    /// Anything outside `{FINISH} ∪ members` is a contract violation of the
    /// model capability, surfaced as an error rather than a fallback route.
    pub fn parse(raw: &str, members: &[String]) -> Result<Self> {
        if raw == FINISH {
            return Ok(Self::Finish);
        }
        if members.iter().any(|m| m == raw) {
            return Ok(Self::Act(raw.to_string()));
        }
        Err(Error::RoutingViolation(format!(
            "router selected unknown node '{}'; eligible: {}, {}",
            raw,
            FINISH,
            members.join(", ")
        )))
    }
}

/// Conversation state owned by the execution engine for one request.
///
/// `messages` is append-only: pushing a new message is the only mutation,
/// and order reflects the order of production. Exactly one node at a time
/// holds the right to produce the next append.
#[derive(Debug)]
pub struct ConversationState {
    messages: Vec<Message>,
    /// The next node to execute; `Finish` before the first supervisor cycle
    pub next: RoutingDecision,
}

impl ConversationState {
    pub fn new(inbound: Vec<Message>) -> Self {
        Self {
            messages: inbound,
            next: RoutingDecision::Finish,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Consume the state, yielding the final message sequence
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members() -> Vec<String> {
        vec!["researcher".to_string(), "mathematician".to_string()]
    }

    #[test]
    fn parse_accepts_finish_and_members() {
        assert_eq!(
            RoutingDecision::parse("FINISH", &members()).unwrap(),
            RoutingDecision::Finish
        );
        assert_eq!(
            RoutingDecision::parse("researcher", &members()).unwrap(),
            RoutingDecision::Act("researcher".to_string())
        );
    }

    #[test]
    fn parse_rejects_out_of_set_tokens() {
        for raw in ["poet", "finish", ""] {
            let err = RoutingDecision::parse(raw, &members()).unwrap_err();
            assert!(matches!(err, Error::RoutingViolation(_)), "got: {err}");
        }
    }

    #[test]
    fn state_defaults_to_finish_and_appends() {
        let mut state = ConversationState::new(vec![Message::user("hi")]);
        assert_eq!(state.next, RoutingDecision::Finish);
        assert_eq!(state.len(), 1);

        state.push(Message::worker("researcher", "done"));
        assert_eq!(state.len(), 2);
        assert_eq!(state.messages()[1].name.as_deref(), Some("researcher"));
    }
}
