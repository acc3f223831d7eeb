//! End-to-end scenarios across the runner, agents, flow, and graph engine.

use agentflow_checkpoint::{CheckpointConfig, CheckpointStore, ListFilter, SqliteCheckpointStore};
use agentflow_core::{
    object_schema, Agent, AgentRef, Declaration, Event, EventStream, FunctionTool, Invocation,
    Message, Model, ModelInfo, ObjectKind, Request, Response, ResponseStream, Result, ToolCall,
    ToolRef,
};
use agentflow_graph::{
    CachePolicy, ExecutorOptions, GraphBuilder, NodeCache, NodeKind, NodeResult, CACHE_HIT_MARKER,
    END,
};
use agentflow_runtime::testing::{tool_call_response, ScriptedModel};
use agentflow_runtime::{GraphAgent, InMemorySessionService, LlmAgent, Runner};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn collect(mut rx: EventStream) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(e) = rx.recv().await {
        events.push(e);
    }
    events
}

fn weather_tool() -> ToolRef {
    Arc::new(FunctionTool::new(
        Declaration::new(
            "get_weather",
            "Current weather for a city",
            object_schema(json!({"city": {"type": "string"}}), &["city"]),
        ),
        |args| async move {
            Ok(json!({
                "city": args["city"],
                "forecast": "sunny",
            }))
        },
    ))
}

#[tokio::test]
async fn test_runner_drives_tool_loop_to_final_answer() {
    let model = Arc::new(ScriptedModel::new(
        "scripted",
        vec![
            vec![tool_call_response(vec![ToolCall::function(
                "call-w1",
                "get_weather",
                r#"{"city": "Tokyo"}"#,
            )])],
            vec![Response::assistant("It is sunny in Tokyo.")],
        ],
    ));
    let agent: AgentRef = Arc::new(
        LlmAgent::builder("weather-bot")
            .with_model(model.clone())
            .with_instructions("Use tools when asked about weather.")
            .with_tool(weather_tool())
            .build(),
    );
    let sessions = Arc::new(InMemorySessionService::new());
    let runner = Runner::new("weather-app", agent, sessions.clone());

    let rx = runner
        .run(
            CancellationToken::new(),
            "user-1",
            "sess-1",
            Message::user("weather in Tokyo?"),
        )
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
            ObjectKind::ChatCompletion,
            ObjectKind::ToolResponse,
            ObjectKind::ChatCompletion,
        ]
    );

    // The tool result preserved the call id and carried the rendered JSON.
    let tool_choice = &events[1].response.as_ref().unwrap().choices[0];
    let tool_message = tool_choice.message.as_ref().unwrap();
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("call-w1"));
    assert!(tool_message.content.contains("sunny"));

    // The loop ends on the final completion, not on the tool turn.
    assert!(events.last().unwrap().is_final());

    // The second model request contained the tool turn.
    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1]
        .messages
        .iter()
        .any(|m| m.tool_call_id.as_deref() == Some("call-w1")));
}

#[tokio::test]
async fn test_direct_sub_agent_call_rewrites_to_transfer() {
    // The model calls the sub-agent's name as if it were a tool; the
    // dispatcher rewrites to transfer_to_agent, and the transfer processor
    // runs the target and forwards its stream.
    let specialist_model = Arc::new(ScriptedModel::new(
        "specialist-model",
        vec![vec![Response::assistant("specialist says hi")]],
    ));
    let specialist: AgentRef = Arc::new(
        LlmAgent::builder("specialist")
            .with_description("Handles specialist questions")
            .with_model(specialist_model)
            .build(),
    );

    let router_model = Arc::new(ScriptedModel::new(
        "router-model",
        vec![vec![tool_call_response(vec![ToolCall::function(
            "call-t1",
            "specialist",
            r#"{"message": "take over"}"#,
        )])]],
    ));
    let router: AgentRef = Arc::new(
        LlmAgent::builder("router")
            .with_model(router_model)
            .with_sub_agent(specialist)
            .build(),
    );

    let invocation = Invocation::new(router.clone(), Message::user("route me"));
    let rx = router
        .run(CancellationToken::new(), invocation)
        .await
        .unwrap();
    let events = collect(rx).await;

    // Tool result kept the original call id even though the call was
    // rewritten to the transfer tool.
    let tool_event = events
        .iter()
        .find(|e| {
            e.response
                .as_ref()
                .is_some_and(|r| r.object == ObjectKind::ToolResponse)
        })
        .unwrap();
    let tool_message = tool_event.response.as_ref().unwrap().choices[0]
        .message
        .as_ref()
        .unwrap();
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("call-t1"));
    assert!(tool_message.content.contains("transferring"));

    // The specialist's final answer arrived on the parent stream.
    let specialist_answer = events
        .iter()
        .filter(|e| e.author == "specialist")
        .last()
        .unwrap();
    assert_eq!(
        specialist_answer.response.as_ref().unwrap().choices[0]
            .message
            .as_ref()
            .unwrap()
            .content,
        "specialist says hi"
    );
}

#[tokio::test]
async fn test_graph_cache_hit_emits_marker() {
    // f(n) = 2n with a 60s TTL; the second run with the same input skips
    // the handler and marks the node-complete event.
    let graph = || {
        GraphBuilder::new()
            .add_node_full(
                "double",
                NodeKind::Function,
                |state: HashMap<String, Value>| async move {
                    let n: i64 = state
                        .get("input")
                        .and_then(Value::as_str)
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0);
                    Ok(NodeResult::write("output", json!(2 * n)))
                },
                Some(
                    CachePolicy::new(Duration::from_secs(60))
                        .with_key_fields(["input".to_string()]),
                ),
                None,
            )
            .set_entry_point("double")
            .add_edge("double", END)
            .compile()
            .unwrap()
    };

    let cache = Arc::new(NodeCache::new());
    let agent: AgentRef =
        Arc::new(GraphAgent::new("doubler", graph()).with_cache(cache.clone()));

    let run = |agent: AgentRef| async move {
        let invocation = Invocation::new(agent.clone(), Message::user("42"));
        let rx = agent
            .run(CancellationToken::new(), invocation)
            .await
            .unwrap();
        collect(rx).await
    };

    let first = run(agent.clone()).await;
    let final_event = first.last().unwrap();
    assert_eq!(final_event.state_delta.as_ref().unwrap()["output"], 84);
    assert!(first
        .iter()
        .all(|e| e.state_delta.as_ref().is_none_or(|d| !d.contains_key(CACHE_HIT_MARKER))));

    let second = run(agent).await;
    assert_eq!(second.last().unwrap().state_delta.as_ref().unwrap()["output"], 84);
    let marked = second.iter().any(|e| {
        e.response
            .as_ref()
            .is_some_and(|r| r.object == ObjectKind::GraphNodeComplete)
            && e.state_delta
                .as_ref()
                .is_some_and(|d| d.get(CACHE_HIT_MARKER) == Some(&Value::Bool(true)))
    });
    assert!(marked, "second run should carry the cache-hit marker");
}

#[tokio::test]
async fn test_graph_agent_persists_checkpoints_to_sqlite() {
    let store = Arc::new(SqliteCheckpointStore::in_memory().unwrap());
    let graph = GraphBuilder::new()
        .add_node("step1", |_state: HashMap<String, Value>| async move {
            Ok(NodeResult::write("progress", json!("halfway")))
        })
        .add_node("step2", |_state: HashMap<String, Value>| async move {
            Ok(NodeResult::write("output", json!("done")))
        })
        .set_entry_point("step1")
        .add_edge("step1", "step2")
        .add_edge("step2", END)
        .compile()
        .unwrap();

    let agent: AgentRef = Arc::new(
        GraphAgent::new("pipeline", graph)
            .with_store(store.clone())
            .with_executor_options(ExecutorOptions {
                lineage_id: "conv-1".to_string(),
                namespace: "main".to_string(),
                ..Default::default()
            }),
    );
    let invocation = Invocation::new(agent.clone(), Message::user("go"));
    let events = collect(agent.run(CancellationToken::new(), invocation).await.unwrap()).await;
    assert!(events.last().unwrap().done);

    // Input checkpoint plus one per step, newest first.
    let config = CheckpointConfig::new("conv-1").with_namespace("main");
    let all = store.list(&config, &ListFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);
    let latest = &all[0].checkpoint;
    assert_eq!(latest.channel_values["output"], "done");
    assert_eq!(latest.channel_values["progress"], "halfway");

    // Pending writes for the final step recorded the node's write, in
    // sequence order.
    let final_writes = &all[0].pending_writes;
    assert!(final_writes.iter().any(|w| w.channel == "output"));
    assert!(final_writes.windows(2).all(|w| w[0].sequence < w[1].sequence));
}

/// Model that produces nothing until cancelled.
struct StalledModel;

#[async_trait]
impl Model for StalledModel {
    fn info(&self) -> ModelInfo {
        ModelInfo {
            name: "stalled".to_string(),
            provider: "test".to_string(),
        }
    }

    async fn generate(&self, ctx: CancellationToken, _request: Request) -> Result<ResponseStream> {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        tokio::spawn(async move {
            ctx.cancelled().await;
            drop(tx);
        });
        Ok(rx)
    }
}

#[tokio::test]
async fn test_cancellation_closes_channel_without_error_event() {
    let agent: AgentRef = Arc::new(
        LlmAgent::builder("slow")
            .with_model(Arc::new(StalledModel))
            .build(),
    );
    let ctx = CancellationToken::new();
    let invocation = Invocation::new(agent.clone(), Message::user("hang"));
    let mut rx = agent.run(ctx.clone(), invocation).await.unwrap();

    ctx.cancel();

    // The channel closes; external cancellation needs no error event.
    let mut events = Vec::new();
    while let Some(e) = rx.recv().await {
        events.push(e);
    }
    assert!(events.iter().all(|e| e.error.is_none()));
}

#[tokio::test]
async fn test_chain_of_llm_agents_preserves_order() {
    let make_agent = |name: &str, answer: &str| -> AgentRef {
        Arc::new(
            LlmAgent::builder(name)
                .with_model(Arc::new(ScriptedModel::new(
                    name,
                    vec![vec![Response::assistant(answer)]],
                )))
                .build(),
        )
    };
    let chain: AgentRef = Arc::new(agentflow_runtime::ChainAgent::new(
        "pipeline",
        vec![
            make_agent("draft", "draft text"),
            make_agent("polish", "polished text"),
        ],
    ));
    let invocation = Invocation::new(chain.clone(), Message::user("write"));
    let events = collect(chain.run(CancellationToken::new(), invocation).await.unwrap()).await;

    let authors: Vec<_> = events.iter().map(|e| e.author.as_str()).collect();
    assert_eq!(authors, ["draft", "polish"]);
}
