//! Node constructors wrapping models, tools, and agents
//!
//! Graph nodes come in four kinds; beyond plain functions, these helpers
//! build handlers around the core abstractions so a graph can call a model,
//! invoke a tool, or delegate to a whole agent as one node. Each reads its
//! input from a named state field and writes its result to another.

use agentflow_core::{
    AgentRef, Invocation, Message, ModelRef, Request, Response, ToolRef,
};
use agentflow_graph::{GraphError, NodeHandler, NodeResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn state_str(state: &HashMap<String, Value>, field: &str) -> String {
    match state.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// A node that sends the input field to `model` as a user message and
/// writes the final completion text to the output field.
pub fn llm_node(
    model: ModelRef,
    input_field: impl Into<String>,
    output_field: impl Into<String>,
) -> NodeHandler {
    let input_field = input_field.into();
    let output_field = output_field.into();

    Arc::new(move |state: HashMap<String, Value>| {
        let model = model.clone();
        let input_field = input_field.clone();
        let output_field = output_field.clone();
        Box::pin(async move {
            let prompt = state_str(&state, &input_field);
            let request = Request::new(vec![Message::user(prompt)]);

            let mut stream = model
                .generate(CancellationToken::new(), request)
                .await
                .map_err(|e| GraphError::Execution(e.to_string()))?;

            let mut last: Option<Response> = None;
            while let Some(item) = stream.recv().await {
                let response = item.map_err(|e| GraphError::Execution(e.to_string()))?;
                if !response.is_partial {
                    last = Some(response);
                }
            }

            let content = last
                .as_ref()
                .and_then(|r| r.choices.first())
                .and_then(|c| c.message.as_ref())
                .map(|m| m.content.clone())
                .ok_or_else(|| {
                    GraphError::Execution("model produced no completion".to_string())
                })?;
            Ok(NodeResult::write(output_field, Value::String(content)))
        })
    })
}

/// A node that invokes `tool` with the input field (raw JSON arguments)
/// and writes the tool's result to the output field.
pub fn tool_node(
    tool: ToolRef,
    args_field: impl Into<String>,
    output_field: impl Into<String>,
) -> NodeHandler {
    let args_field = args_field.into();
    let output_field = output_field.into();

    Arc::new(move |state: HashMap<String, Value>| {
        let tool = tool.clone();
        let args_field = args_field.clone();
        let output_field = output_field.clone();
        Box::pin(async move {
            let args = state
                .get(&args_field)
                .cloned()
                .unwrap_or(Value::Object(serde_json::Map::new()));
            let bytes = serde_json::to_vec(&args)
                .map_err(|e| GraphError::Execution(e.to_string()))?;

            let result = tool
                .call(CancellationToken::new(), &bytes)
                .await
                .map_err(|e| {
                    GraphError::node_execution(tool.declaration().name.clone(), e.to_string())
                })?;
            Ok(NodeResult::write(output_field, result))
        })
    })
}

/// A node that runs `agent` on the input field as a user message, drains
/// its event stream, and writes the last completed response text to the
/// output field.
pub fn agent_node(
    agent: AgentRef,
    input_field: impl Into<String>,
    output_field: impl Into<String>,
) -> NodeHandler {
    let input_field = input_field.into();
    let output_field = output_field.into();

    Arc::new(move |state: HashMap<String, Value>| {
        let agent = agent.clone();
        let input_field = input_field.clone();
        let output_field = output_field.clone();
        Box::pin(async move {
            let message = Message::user(state_str(&state, &input_field));
            let invocation = Invocation::new(agent.clone(), message);
            let mut stream = agent
                .run(CancellationToken::new(), invocation)
                .await
                .map_err(|e| GraphError::node_execution(agent.name(), e.to_string()))?;

            let mut answer: Option<String> = None;
            while let Some(event) = stream.recv().await {
                if let Some(error) = &event.error {
                    return Err(GraphError::node_execution(
                        agent.name(),
                        error.message.clone(),
                    ));
                }
                if !event.done {
                    continue;
                }
                if let Some(content) = event
                    .response
                    .as_ref()
                    .and_then(|r| r.choices.first())
                    .and_then(|c| c.message.as_ref())
                    .map(|m| m.content.clone())
                {
                    answer = Some(content);
                }
            }

            let content = answer.ok_or_else(|| {
                GraphError::node_execution(agent.name(), "agent produced no response")
            })?;
            Ok(NodeResult::write(output_field, Value::String(content)))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;
    use agentflow_core::{object_schema, Declaration, FunctionTool};
    use agentflow_graph::{Executor, GraphBuilder, NodeKind, END};
    use serde_json::json;

    fn run_handler(
        handler: NodeHandler,
        state: HashMap<String, Value>,
    ) -> impl std::future::Future<Output = agentflow_graph::Result<NodeResult>> {
        handler(state)
    }

    #[tokio::test]
    async fn test_llm_node_writes_completion() {
        let model = Arc::new(ScriptedModel::new(
            "m",
            vec![vec![Response::assistant("model output")]],
        ));
        let handler = llm_node(model, "question", "answer");
        let result = run_handler(
            handler,
            HashMap::from([("question".to_string(), json!("why?"))]),
        )
        .await
        .unwrap();
        assert_eq!(result.writes["answer"], "model output");
    }

    #[tokio::test]
    async fn test_tool_node_invokes_with_state_args() {
        let tool: ToolRef = Arc::new(FunctionTool::new(
            Declaration::new(
                "adder",
                "Adds two numbers",
                object_schema(
                    json!({"a": {"type": "number"}, "b": {"type": "number"}}),
                    &["a", "b"],
                ),
            ),
            |args| async move {
                let sum = args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0);
                Ok(json!(sum))
            },
        ));
        let handler = tool_node(tool, "args", "sum");
        let result = run_handler(
            handler,
            HashMap::from([("args".to_string(), json!({"a": 2, "b": 3}))]),
        )
        .await
        .unwrap();
        assert_eq!(result.writes["sum"], 5);
    }

    #[tokio::test]
    async fn test_agent_node_in_graph() {
        let inner: AgentRef = Arc::new(
            crate::llm_agent::LlmAgent::builder("summarizer")
                .with_model(Arc::new(ScriptedModel::new(
                    "m",
                    vec![vec![Response::assistant("a summary")]],
                )))
                .build(),
        );

        let graph = GraphBuilder::new()
            .add_node_full(
                "summarize",
                NodeKind::SubAgent,
                {
                    let handler = agent_node(inner, "input", "output");
                    move |state| {
                        let handler = handler.clone();
                        async move { handler(state).await }
                    }
                },
                None,
                None,
            )
            .set_entry_point("summarize")
            .add_edge("summarize", END)
            .compile()
            .unwrap();

        let outcome = Executor::new(Arc::new(graph))
            .run(
                CancellationToken::new(),
                HashMap::from([("input".to_string(), json!("long text"))]),
            )
            .await
            .unwrap();
        assert_eq!(outcome.state()["output"], "a summary");
    }
}
