//! Execution engine
//!
//! A directed state machine over the shared conversation state: control
//! starts at the supervisor, branches to the worker it selects, returns to
//! the supervisor after the worker's reply is applied, and repeats until
//! the supervisor emits FINISH or the hop budget runs out. Exactly one
//! node executes at a time; the engine is the only writer of the state.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::agents::{Supervisor, SUPERVISOR_NODE, ToolCallRecord, WorkerAgent};
use crate::config::OrchestrationConfig;
use crate::graph::events::EventSink;
use crate::graph::state::{ConversationState, RoutingDecision};
use crate::llm::{LlmClient, Message};
use crate::tool::ToolRegistry;
use crate::{Error, Result};

/// Tool actions one worker activation took, for the step-by-step trace
#[derive(Debug, serde::Serialize)]
pub struct WorkerStep {
    pub worker: String,
    /// True when the worker's own iteration cap cut its loop short
    pub truncated: bool,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Final result of one orchestrated turn
#[derive(Debug)]
pub struct TurnOutcome {
    /// The full message sequence: the inbound messages plus every worker
    /// reply, in production order
    pub messages: Vec<Message>,
    /// True when the hop bound forced termination instead of a clean FINISH
    pub truncated: bool,
    /// Completed supervisor→worker cycles
    pub hops: usize,
    /// Per-activation tool traces, in execution order
    pub steps: Vec<WorkerStep>,
}

/// The orchestration graph: supervisor, workers, and the transition rules
pub struct Orchestrator {
    supervisor: Supervisor,
    workers: Vec<WorkerAgent>,
    by_name: HashMap<String, usize>,
    max_hops: usize,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("workers", &self.workers)
            .field("by_name", &self.by_name)
            .field("max_hops", &self.max_hops)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Assemble a graph from already-constructed nodes.
    ///
    /// Worker names become routing tokens, so duplicates are rejected here
    /// rather than surfacing as misrouting later.
    pub fn new(supervisor: Supervisor, workers: Vec<WorkerAgent>, max_hops: usize) -> Result<Self> {
        let mut by_name = HashMap::new();
        for (index, worker) in workers.iter().enumerate() {
            if by_name.insert(worker.name().to_string(), index).is_some() {
                return Err(Error::Config(format!(
                    "duplicate worker name '{}'",
                    worker.name()
                )));
            }
        }

        Ok(Self {
            supervisor,
            workers,
            by_name,
            max_hops,
        })
    }

    /// Build the whole graph from configuration: one LLM client per node,
    /// worker toolsets resolved against the registry. Any invalid piece of
    /// configuration fails here, before a single request is served.
    pub fn from_config(config: &OrchestrationConfig, registry: Arc<ToolRegistry>) -> Result<Self> {
        let supervisor_client = Arc::new(LlmClient::new(&config.supervisor)?);
        let supervisor = Supervisor::new(
            supervisor_client,
            config.worker_names(),
            config.supervisor.temperature,
            2048,
        );

        let mut workers = Vec::with_capacity(config.workers.len());
        for definition in &config.workers {
            let client = Arc::new(LlmClient::new(&definition.model)?);
            workers.push(WorkerAgent::new(
                definition,
                client,
                Arc::clone(&registry),
                &config.limits,
            )?);
        }

        info!(
            workers = ?config.worker_names(),
            max_hops = config.limits.max_hops,
            "Orchestration graph constructed"
        );

        Self::new(supervisor, workers, config.limits.max_hops)
    }

    /// Names of the registered workers, in registration order
    pub fn worker_names(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.name()).collect()
    }

    /// Run one conversation turn to termination.
    ///
    /// Engine events flow into `sink` as they happen; pass
    /// [`EventSink::disabled`] when nothing consumes them. If the sink's
    /// consumer disconnects mid-turn, the engine stops scheduling further
    /// nodes; output already streamed is not retracted.
    pub async fn run(&self, inbound: Vec<Message>, sink: &EventSink) -> Result<TurnOutcome> {
        let mut state = ConversationState::new(inbound);
        let mut steps = Vec::new();
        let mut hops = 0usize;
        let mut truncated = false;

        loop {
            if sink.is_closed() {
                debug!("Event consumer disconnected; stopping the turn");
                break;
            }

            sink.node_entered(SUPERVISOR_NODE);
            let decision = self.supervisor.decide(state.messages(), sink).await?;
            sink.node_exited(SUPERVISOR_NODE);
            state.next = decision.clone();

            let name = match decision {
                RoutingDecision::Finish => {
                    debug!(hops, "Supervisor finished the turn");
                    break;
                }
                RoutingDecision::Act(name) => name,
            };

            if hops >= self.max_hops {
                warn!(
                    max_hops = self.max_hops,
                    "Hop bound reached; forcing termination"
                );
                truncated = true;
                break;
            }

            // The supervisor already validated the token; a miss here means
            // the node map and the routing vocabulary diverged.
            let index = *self.by_name.get(&name).ok_or_else(|| {
                Error::RoutingViolation(format!("no node registered for worker '{}'", name))
            })?;
            let worker = &self.workers[index];

            sink.node_entered(worker.name());
            let reply = worker.run(state.messages(), sink).await?;
            sink.node_exited(worker.name());

            steps.push(WorkerStep {
                worker: worker.name().to_string(),
                truncated: reply.truncated,
                tool_calls: reply.tool_calls,
            });
            state.push(reply.message);
            hops += 1;
        }

        Ok(TurnOutcome {
            messages: state.into_messages(),
            truncated,
            hops,
            steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::agents::FINISH;
    use crate::graph::events::EngineEvent;
    use crate::graph::TokenSink;
    use crate::llm::{ChatModel, ChatRequest, ChatResponse, ContentBlock};

    /// Router that plays back a fixed sequence of routing tokens, then FINISH
    struct ScriptedRouter {
        script: Mutex<Vec<&'static str>>,
    }

    impl ScriptedRouter {
        fn new(script: Vec<&'static str>) -> Self {
            Self {
                script: Mutex::new(script),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedRouter {
        async fn chat(
            &self,
            _request: ChatRequest,
            _deltas: &TokenSink,
        ) -> crate::Result<ChatResponse> {
            let mut script = self.script.lock().unwrap();
            let next = if script.is_empty() {
                FINISH
            } else {
                script.remove(0)
            };
            Ok(ChatResponse {
                content: vec![ContentBlock::ToolUse {
                    id: "call_route".into(),
                    name: "route".into(),
                    input: json!({"next": next}),
                }],
                stop_reason: "tool_use".into(),
            })
        }

        fn model(&self) -> &str {
            "scripted-router"
        }
    }

    /// Worker model that replies with fixed text, optionally in deltas
    struct EchoWorkerModel {
        reply: String,
        deltas: Vec<&'static str>,
        calls: AtomicUsize,
    }

    impl EchoWorkerModel {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                deltas: vec![],
                calls: AtomicUsize::new(0),
            }
        }

        fn with_deltas(reply: &str, deltas: Vec<&'static str>) -> Self {
            Self {
                reply: reply.to_string(),
                deltas,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatModel for EchoWorkerModel {
        async fn chat(
            &self,
            _request: ChatRequest,
            deltas: &TokenSink,
        ) -> crate::Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            for delta in &self.deltas {
                deltas.push(delta);
            }
            Ok(ChatResponse {
                content: vec![ContentBlock::Text {
                    text: self.reply.clone(),
                }],
                stop_reason: "end_turn".into(),
            })
        }

        fn model(&self) -> &str {
            "echo-worker"
        }
    }

    fn worker(name: &str, model: Arc<dyn ChatModel>) -> WorkerAgent {
        WorkerAgent::with_parts(
            name,
            "You are a test worker.",
            model,
            vec![],
            Arc::new(ToolRegistry::new()),
            8,
            1024,
        )
    }

    fn orchestrator(script: Vec<&'static str>, max_hops: usize) -> Orchestrator {
        let supervisor = Supervisor::new(
            Arc::new(ScriptedRouter::new(script)),
            vec!["researcher".to_string()],
            None,
            2048,
        );
        let workers = vec![worker("researcher", Arc::new(EchoWorkerModel::new("done")))];
        Orchestrator::new(supervisor, workers, max_hops).unwrap()
    }

    #[tokio::test]
    async fn immediate_finish_runs_zero_workers() {
        let orchestrator = orchestrator(vec![], 6);
        let inbound = vec![Message::user("hello")];

        let outcome = orchestrator
            .run(inbound.clone(), &EventSink::disabled())
            .await
            .unwrap();

        assert_eq!(outcome.hops, 0);
        assert!(!outcome.truncated);
        assert!(outcome.steps.is_empty());
        // the original input comes back unchanged
        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.messages[0].text_content(), "hello");
    }

    #[tokio::test]
    async fn routes_to_worker_then_finishes() {
        let orchestrator = orchestrator(vec!["researcher"], 6);

        let outcome = orchestrator
            .run(vec![Message::user("look this up")], &EventSink::disabled())
            .await
            .unwrap();

        assert_eq!(outcome.hops, 1);
        assert!(!outcome.truncated);
        assert_eq!(outcome.messages.len(), 2);
        assert_eq!(outcome.messages[1].name.as_deref(), Some("researcher"));
        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(outcome.steps[0].worker, "researcher");
    }

    #[tokio::test]
    async fn messages_grow_monotonically() {
        let orchestrator = orchestrator(vec!["researcher", "researcher", "researcher"], 6);

        let outcome = orchestrator
            .run(vec![Message::user("go")], &EventSink::disabled())
            .await
            .unwrap();

        // one inbound + one reply per hop, nothing edited or removed
        assert_eq!(outcome.hops, 3);
        assert_eq!(outcome.messages.len(), 4);
        assert_eq!(outcome.messages[0].text_content(), "go");
    }

    #[tokio::test]
    async fn hop_bound_forces_truncated_termination() {
        // a router that never finishes
        struct AlwaysSame;

        #[async_trait]
        impl ChatModel for AlwaysSame {
            async fn chat(
                &self,
                _request: ChatRequest,
                _deltas: &TokenSink,
            ) -> crate::Result<ChatResponse> {
                Ok(ChatResponse {
                    content: vec![ContentBlock::ToolUse {
                        id: "call_route".into(),
                        name: "route".into(),
                        input: json!({"next": "researcher"}),
                    }],
                    stop_reason: "tool_use".into(),
                })
            }

            fn model(&self) -> &str {
                "always-same"
            }
        }

        let supervisor = Supervisor::new(
            Arc::new(AlwaysSame),
            vec!["researcher".to_string()],
            None,
            2048,
        );
        let model = Arc::new(EchoWorkerModel::new("again"));
        let workers = vec![worker("researcher", model.clone())];
        let orchestrator = Orchestrator::new(supervisor, workers, 3).unwrap();

        let outcome = orchestrator
            .run(vec![Message::user("go")], &EventSink::disabled())
            .await
            .unwrap();

        assert!(outcome.truncated);
        // exactly max_hops worker executions, never more
        assert_eq!(outcome.hops, 3);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.messages.len(), 4);
    }

    #[tokio::test]
    async fn out_of_set_route_is_a_contract_violation() {
        let orchestrator = orchestrator(vec!["poet"], 6);

        let err = orchestrator
            .run(vec![Message::user("go")], &EventSink::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RoutingViolation(_)), "got: {err}");
    }

    #[tokio::test]
    async fn route_without_registered_node_is_a_contract_violation() {
        // the routing vocabulary admits "ghost" but no such node exists
        let supervisor = Supervisor::new(
            Arc::new(ScriptedRouter::new(vec!["ghost"])),
            vec!["researcher".to_string(), "ghost".to_string()],
            None,
            2048,
        );
        let workers = vec![worker("researcher", Arc::new(EchoWorkerModel::new("x")))];
        let orchestrator = Orchestrator::new(supervisor, workers, 6).unwrap();

        let err = orchestrator
            .run(vec![Message::user("go")], &EventSink::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RoutingViolation(_)), "got: {err}");
    }

    #[tokio::test]
    async fn emits_node_transitions_and_deltas_in_order() {
        let supervisor = Supervisor::new(
            Arc::new(ScriptedRouter::new(vec!["researcher"])),
            vec!["researcher".to_string()],
            None,
            2048,
        );
        let workers = vec![worker(
            "researcher",
            Arc::new(EchoWorkerModel::with_deltas("Hello", vec!["Hel", "lo"])),
        )];
        let orchestrator = Orchestrator::new(supervisor, workers, 6).unwrap();

        let (sink, mut rx) = EventSink::channel();
        orchestrator
            .run(vec![Message::user("hi")], &sink)
            .await
            .unwrap();
        drop(sink);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        let expected = [
            EngineEvent::NodeEntered {
                node: "supervisor".into(),
            },
            EngineEvent::NodeExited {
                node: "supervisor".into(),
            },
            EngineEvent::NodeEntered {
                node: "researcher".into(),
            },
            EngineEvent::ModelDelta {
                node: "researcher".into(),
                text: "Hel".into(),
            },
            EngineEvent::ModelDelta {
                node: "researcher".into(),
                text: "lo".into(),
            },
            EngineEvent::NodeExited {
                node: "researcher".into(),
            },
            EngineEvent::NodeEntered {
                node: "supervisor".into(),
            },
            EngineEvent::NodeExited {
                node: "supervisor".into(),
            },
        ];
        assert_eq!(events, expected);
    }

    #[tokio::test]
    async fn disconnected_consumer_stops_scheduling() {
        let orchestrator = orchestrator(vec!["researcher", "researcher"], 6);

        let (sink, rx) = EventSink::channel();
        drop(rx);

        let outcome = orchestrator
            .run(vec![Message::user("go")], &sink)
            .await
            .unwrap();

        // nothing ran: the consumer was already gone
        assert_eq!(outcome.hops, 0);
        assert_eq!(outcome.messages.len(), 1);
    }

    #[tokio::test]
    async fn deterministic_given_deterministic_collaborators() {
        async fn run(script: Vec<&'static str>, inbound: Vec<Message>) -> TurnOutcome {
            let orchestrator = orchestrator(script, 6);
            orchestrator
                .run(inbound, &EventSink::disabled())
                .await
                .unwrap()
        }

        let inbound = vec![Message::user("same input")];
        let first = run(vec!["researcher", "researcher"], inbound.clone()).await;
        let second = run(vec!["researcher", "researcher"], inbound.clone()).await;

        assert_eq!(first.messages.len(), second.messages.len());
        for (a, b) in first.messages.iter().zip(second.messages.iter()) {
            assert_eq!(a.text_content(), b.text_content());
            assert_eq!(a.name, b.name);
        }
    }

    #[tokio::test]
    async fn duplicate_worker_names_rejected_at_assembly() {
        let supervisor = Supervisor::new(
            Arc::new(ScriptedRouter::new(vec![])),
            vec!["twin".to_string()],
            None,
            2048,
        );
        let model: Arc<dyn ChatModel> = Arc::new(EchoWorkerModel::new("x"));
        let workers = vec![worker("twin", model.clone()), worker("twin", model)];

        let err = Orchestrator::new(supervisor, workers, 6).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got: {err}");
    }
}
