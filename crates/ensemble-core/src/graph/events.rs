//! Engine event feed
//!
//! The execution engine pushes typed events onto an explicit channel as it
//! runs; the stream aggregator consumes them on the other end. Producers
//! never block and never fail: once the consumer is gone, events are
//! silently dropped and `is_closed` lets the engine stop scheduling work.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// One internal execution event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A node took control of the conversation state
    NodeEntered { node: String },
    /// A model emitted a content delta while the named node was active.
    /// `text` is empty for deltas that carry only tool-call scaffolding.
    ModelDelta { node: String, text: String },
    /// A node released control
    NodeExited { node: String },
}

/// Sending half of the engine event feed
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<UnboundedSender<EngineEvent>>,
}

impl EventSink {
    /// Create a connected sink/receiver pair
    pub fn channel() -> (Self, UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards every event (non-streaming runs)
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emit an event; a gone consumer is not an error
    pub fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn node_entered(&self, node: &str) {
        self.emit(EngineEvent::NodeEntered {
            node: node.to_string(),
        });
    }

    pub fn node_exited(&self, node: &str) {
        self.emit(EngineEvent::NodeExited {
            node: node.to_string(),
        });
    }

    /// Whether the consuming end has disconnected.
    ///
    /// A disabled sink reports `false`: there is no consumer to lose.
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.is_closed())
    }

    /// A delta sink tagged with the node currently generating
    pub fn scope(&self, node: &str) -> TokenSink {
        TokenSink {
            sink: self.clone(),
            node: node.to_string(),
        }
    }
}

/// Per-node view of the event feed, handed to the model capability so its
/// token deltas are attributed to the producing node
#[derive(Debug, Clone)]
pub struct TokenSink {
    sink: EventSink,
    node: String,
}

impl TokenSink {
    /// Emit one content delta
    pub fn push(&self, text: &str) {
        self.sink.emit(EngineEvent::ModelDelta {
            node: self.node.clone(),
            text: text.to_string(),
        });
    }

    pub fn node(&self) -> &str {
        &self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_emission_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.node_entered("supervisor");
        sink.scope("supervisor").push("hi");
        sink.node_exited("supervisor");
        drop(sink);

        assert_eq!(
            rx.recv().await,
            Some(EngineEvent::NodeEntered {
                node: "supervisor".into()
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(EngineEvent::ModelDelta {
                node: "supervisor".into(),
                text: "hi".into()
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(EngineEvent::NodeExited {
                node: "supervisor".into()
            })
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn closed_receiver_is_observable_and_harmless() {
        let (sink, rx) = EventSink::channel();
        assert!(!sink.is_closed());
        drop(rx);
        assert!(sink.is_closed());
        // emitting after disconnect must not panic
        sink.node_entered("worker");
    }

    #[test]
    fn disabled_sink_never_reports_closed() {
        let sink = EventSink::disabled();
        assert!(!sink.is_closed());
        sink.node_entered("worker");
        sink.scope("worker").push("dropped");
    }
}
