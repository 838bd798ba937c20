//! Event/stream aggregator
//!
//! Projects the engine's internal event feed into a plain text stream for
//! the client boundary: only model deltas that carry textual content are
//! forwarded, in emission order; node transitions and tool-call
//! scaffolding are internal-only signal. The output stream ends exactly
//! when the event feed closes.

use futures::Stream;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::graph::EngineEvent;

/// Turn the engine's event feed into an ordered stream of text fragments
pub fn text_stream(receiver: UnboundedReceiver<EngineEvent>) -> impl Stream<Item = String> {
    futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Some(EngineEvent::ModelDelta { text, .. }) if !text.is_empty() => {
                    return Some((text, receiver));
                }
                Some(_) => continue,
                None => return None,
            }
        }
    })
}
