//! Graph-backed agent: binds the step executor to an event channel
//!
//! A [`GraphAgent`] runs a compiled graph per invocation, translating node
//! lifecycle into `graph.node.*` events and checkpointing between steps when
//! a store is attached. The invocation's user message seeds the initial
//! state under the configured input key; the final state is emitted as the
//! closing event.

use agentflow_core::{
    event_channel, Agent, Choice, ErrorKind, Event, EventSender, EventStream, Invocation, Message,
    ObjectKind, Response, Result, ToolRef,
};
use agentflow_checkpoint::CheckpointStore;
use agentflow_graph::{
    ExecutionOutcome, Executor, ExecutorOptions, Graph, NodeCache, NodeEvent, NodePhase,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default state field receiving the invocation's user message
pub const DEFAULT_INPUT_KEY: &str = "input";

/// Default state field read back as the final response
pub const DEFAULT_OUTPUT_KEY: &str = "output";

/// Runs a compiled graph as an agent
pub struct GraphAgent {
    name: String,
    description: String,
    graph: Arc<Graph>,
    store: Option<Arc<dyn CheckpointStore>>,
    cache: Arc<NodeCache>,
    executor_options: ExecutorOptions,
    input_key: String,
    output_key: String,
}

impl GraphAgent {
    pub fn new(name: impl Into<String>, graph: Graph) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            graph: Arc::new(graph),
            store: None,
            cache: Arc::new(NodeCache::new()),
            executor_options: ExecutorOptions::default(),
            input_key: DEFAULT_INPUT_KEY.to_string(),
            output_key: DEFAULT_OUTPUT_KEY.to_string(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Share a node cache across invocations of this agent.
    pub fn with_cache(mut self, cache: Arc<NodeCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_executor_options(mut self, options: ExecutorOptions) -> Self {
        self.executor_options = options;
        self
    }

    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = key.into();
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    fn node_event_to_event(invocation_id: &str, node_event: NodeEvent) -> Event {
        let object = match node_event.phase {
            NodePhase::Start => ObjectKind::GraphNodeStart,
            NodePhase::Complete => ObjectKind::GraphNodeComplete,
            NodePhase::Error => ObjectKind::GraphNodeError,
        };
        let mut response = Response::new(object);
        response.is_partial = true;
        if let Some(message) = &node_event.error {
            response.error = Some(agentflow_core::ResponseError {
                kind: "graph_node_error".to_string(),
                message: message.clone(),
            });
        }

        let mut event = Event::from_response(invocation_id, &node_event.node_id, response);
        if !node_event.state_delta.is_empty() {
            event.state_delta = Some(node_event.state_delta);
        }
        event
    }

    fn final_event(
        invocation_id: &str,
        author: &str,
        output_key: &str,
        state: &HashMap<String, Value>,
    ) -> Event {
        let content = match state.get(output_key) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => serde_json::to_string(state).unwrap_or_default(),
        };
        let mut response = Response::new(ObjectKind::ChatCompletion);
        response.choices.push(Choice {
            index: 0,
            delta: None,
            message: Some(Message::assistant(content)),
            finish_reason: Some("stop".to_string()),
        });
        let mut event = Event::from_response(invocation_id, author, response);
        event.state_delta = Some(state.clone());
        event
    }
}

#[async_trait]
impl Agent for GraphAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn tools(&self) -> Vec<ToolRef> {
        Vec::new()
    }

    async fn run(&self, ctx: CancellationToken, invocation: Invocation) -> Result<EventStream> {
        let (tx, rx) = event_channel(invocation.options.channel_buffer_size, ctx.clone());

        let (node_tx, mut node_rx) = mpsc::channel(invocation.options.channel_buffer_size);
        let mut executor = Executor::new(self.graph.clone())
            .with_cache(self.cache.clone())
            .with_events(node_tx)
            .with_options(self.executor_options.clone());
        if let Some(store) = &self.store {
            executor = executor.with_store(store.clone());
        }

        let initial_state = HashMap::from([(
            self.input_key.clone(),
            Value::String(invocation.message.content.clone()),
        )]);

        let invocation_id = invocation.invocation_id.clone();
        let author = self.name.clone();
        let output_key = self.output_key.clone();

        let executor_task =
            tokio::spawn(async move { executor.run(ctx, initial_state).await });

        tokio::spawn(async move {
            forward_node_events(&tx, &invocation_id, &mut node_rx).await;

            match executor_task.await {
                Ok(Ok(outcome)) => {
                    if let ExecutionOutcome::Interrupted { node, reason, .. } = &outcome {
                        tracing::debug!(node, reason, "graph interrupted");
                    }
                    let event =
                        Self::final_event(&invocation_id, &author, &output_key, outcome.state());
                    let _ = tx.send(event).await;
                }
                Ok(Err(agentflow_graph::GraphError::Cancelled)) => {}
                Ok(Err(e)) => {
                    let _ = tx
                        .send(Event::error(
                            &invocation_id,
                            &author,
                            ErrorKind::GraphNodeError,
                            e.to_string(),
                        ))
                        .await;
                }
                Err(join_err) => {
                    let _ = tx
                        .send(Event::error(
                            &invocation_id,
                            &author,
                            ErrorKind::FlowError,
                            join_err.to_string(),
                        ))
                        .await;
                }
            }
        });

        Ok(rx)
    }
}

async fn forward_node_events(
    tx: &EventSender,
    invocation_id: &str,
    node_rx: &mut mpsc::Receiver<NodeEvent>,
) {
    while let Some(node_event) = node_rx.recv().await {
        let event = GraphAgent::node_event_to_event(invocation_id, node_event);
        if tx.send(event).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::AgentRef;
    use agentflow_graph::{GraphBuilder, NodeResult, END};
    use serde_json::json;

    async fn collect(mut rx: EventStream) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        events
    }

    fn upper_graph() -> Graph {
        GraphBuilder::new()
            .add_node("upper", |state: HashMap<String, Value>| async move {
                let input = state
                    .get("input")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Ok(NodeResult::write("output", json!(input.to_uppercase())))
            })
            .set_entry_point("upper")
            .add_edge("upper", END)
            .compile()
            .unwrap()
    }

    #[tokio::test]
    async fn test_graph_agent_lifecycle_events_and_final() {
        let agent: AgentRef = Arc::new(GraphAgent::new("shouter", upper_graph()));
        let invocation = Invocation::new(agent.clone(), Message::user("hello"));
        let rx = agent
            .run(CancellationToken::new(), invocation)
            .await
            .unwrap();
        let events = collect(rx).await;

        let kinds: Vec<_> = events
            .iter()
            .map(|e| e.response.as_ref().unwrap().object)
            .collect();
        assert_eq!(
            kinds,
            [
                ObjectKind::GraphNodeStart,
                ObjectKind::GraphNodeComplete,
                ObjectKind::ChatCompletion,
            ]
        );

        let last = events.last().unwrap();
        assert!(last.done);
        assert_eq!(
            last.response.as_ref().unwrap().choices[0]
                .message
                .as_ref()
                .unwrap()
                .content,
            "HELLO"
        );
        assert_eq!(last.state_delta.as_ref().unwrap()["output"], "HELLO");
        // Exactly one done event, and it is last.
        assert_eq!(events.iter().filter(|e| e.done).count(), 1);
    }

    #[tokio::test]
    async fn test_graph_agent_error_surfaces_as_event() {
        let graph = GraphBuilder::new()
            .add_node("explode", |_state: HashMap<String, Value>| async move {
                Err::<NodeResult, _>(agentflow_graph::GraphError::Execution(
                    "bad node".to_string(),
                ))
            })
            .set_entry_point("explode")
            .compile()
            .unwrap();
        let agent: AgentRef = Arc::new(GraphAgent::new("g", graph));
        let invocation = Invocation::new(agent.clone(), Message::user("x"));
        let rx = agent
            .run(CancellationToken::new(), invocation)
            .await
            .unwrap();
        let events = collect(rx).await;

        let last = events.last().unwrap();
        assert_eq!(last.error.as_ref().unwrap().kind, ErrorKind::GraphNodeError);
        assert!(last.done);
    }
}
