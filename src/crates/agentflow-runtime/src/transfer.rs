//! Sub-agent delegation via the synthesized `transfer_to_agent` tool
//!
//! An LLM agent with sub-agents exposes one extra tool whose schema
//! enumerates the sub-agent names. When the model calls it (or calls a
//! sub-agent's name directly - the dispatcher rewrites such calls preserving
//! the original call id), the transfer response processor runs the target
//! sub-agent and forwards its entire stream, then ends the invocation.

use crate::flow::ResponseProcessor;
use agentflow_core::{
    object_schema, AgentRef, Declaration, ErrorKind, Event, EventSender, FunctionTool, Invocation,
    Message, Response, Result, ToolRef,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Name of the synthesized delegation tool
pub const TRANSFER_TOOL_NAME: &str = "transfer_to_agent";

/// Build the `transfer_to_agent` tool whose schema lists `sub_agents`.
pub fn transfer_tool(sub_agents: &[AgentRef]) -> ToolRef {
    let names: Vec<Value> = sub_agents
        .iter()
        .map(|a| Value::String(a.name().to_string()))
        .collect();
    let descriptions: String = sub_agents
        .iter()
        .map(|a| format!("- {}: {}", a.name(), a.description()))
        .collect::<Vec<_>>()
        .join("\n");

    let declaration = Declaration::new(
        TRANSFER_TOOL_NAME,
        format!("Hand the conversation over to a specialized agent.\n{descriptions}"),
        object_schema(
            json!({
                "agent_name": {
                    "type": "string",
                    "description": "Name of the agent to transfer to",
                    "enum": names,
                },
                "message": {
                    "type": "string",
                    "description": "Message to forward to the target agent",
                },
            }),
            &["agent_name"],
        ),
    );

    // The tool itself only acknowledges; the response processor performs
    // the delegation.
    Arc::new(FunctionTool::new(declaration, |args| async move {
        Ok(json!({
            "status": "transferring",
            "agent_name": args.get("agent_name").cloned().unwrap_or(Value::Null),
        }))
    }))
}

/// Detects transfer calls in a response and runs the target sub-agent
pub struct TransferResponseProcessor;

impl TransferResponseProcessor {
    /// The transfer target named by `response`, if any: an explicit
    /// `transfer_to_agent` call, or a direct call of a sub-agent's name.
    fn transfer_target(invocation: &Invocation, response: &Response) -> Option<(String, String)> {
        let agent = invocation.agent.as_ref()?;
        for call in response.tool_calls() {
            let args: Value = serde_json::from_str(&call.function.arguments).unwrap_or_default();
            if call.function.name == TRANSFER_TOOL_NAME {
                if let Some(name) = args.get("agent_name").and_then(Value::as_str) {
                    let message = args
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or(&invocation.message.content)
                        .to_string();
                    return Some((name.to_string(), message));
                }
            } else if agent.find_sub_agent(&call.function.name).is_some() {
                let message = args
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or(&invocation.message.content)
                    .to_string();
                return Some((call.function.name.clone(), message));
            }
        }
        None
    }
}

#[async_trait]
impl ResponseProcessor for TransferResponseProcessor {
    fn name(&self) -> &str {
        "transfer"
    }

    async fn process_response(
        &self,
        invocation: &mut Invocation,
        response: &Response,
        events: &EventSender,
    ) -> Result<()> {
        let Some((target_name, message)) = Self::transfer_target(invocation, response) else {
            return Ok(());
        };
        let Some(target) = invocation
            .agent
            .as_ref()
            .and_then(|a| a.find_sub_agent(&target_name))
        else {
            events
                .send(Event::error(
                    &invocation.invocation_id,
                    &invocation.agent_name,
                    ErrorKind::FlowError,
                    format!("transfer target '{target_name}' is not a sub-agent"),
                ))
                .await?;
            invocation.end_invocation = true;
            return Ok(());
        };

        tracing::debug!(target = %target_name, "transferring to sub-agent");

        let mut child = invocation.fork(target.clone());
        child.message = Message::user(message);
        match target.run(events.context().clone(), child).await {
            Ok(mut stream) => {
                while let Some(event) = stream.recv().await {
                    events.send(event).await?;
                }
            }
            Err(e) => {
                events
                    .send(Event::error(
                        &invocation.invocation_id,
                        &target_name,
                        ErrorKind::FlowError,
                        e.to_string(),
                    ))
                    .await?;
            }
        }

        invocation.end_invocation = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::EmitterAgent;
    use agentflow_core::ToolCall;
    use tokio_util::sync::CancellationToken;

    fn agent_with_subs() -> AgentRef {
        Arc::new(crate::chain::ChainAgent::new(
            "host",
            vec![Arc::new(EmitterAgent::new("researcher", 1))],
        ))
    }

    #[test]
    fn test_transfer_tool_schema_lists_sub_agents() {
        let subs: Vec<AgentRef> = vec![
            Arc::new(EmitterAgent::new("researcher", 1)),
            Arc::new(EmitterAgent::new("writer", 1)),
        ];
        let tool = transfer_tool(&subs);
        let decl = tool.declaration();
        assert_eq!(decl.name, TRANSFER_TOOL_NAME);
        let enum_names = &decl.input_schema["properties"]["agent_name"]["enum"];
        assert_eq!(enum_names, &json!(["researcher", "writer"]));
    }

    #[test]
    fn test_transfer_target_from_explicit_call() {
        let agent = agent_with_subs();
        let mut invocation = Invocation::new(agent, Message::user("original"));
        invocation.agent_name = "host".to_string();

        let response = crate::testing::tool_call_response(vec![ToolCall::function(
            "c1",
            TRANSFER_TOOL_NAME,
            r#"{"agent_name": "researcher", "message": "dig in"}"#,
        )]);
        let (name, message) =
            TransferResponseProcessor::transfer_target(&invocation, &response).unwrap();
        assert_eq!(name, "researcher");
        assert_eq!(message, "dig in");
    }

    #[test]
    fn test_transfer_target_from_direct_sub_agent_call() {
        let agent = agent_with_subs();
        let invocation = Invocation::new(agent, Message::user("original"));

        let response = crate::testing::tool_call_response(vec![ToolCall::function(
            "c2",
            "researcher",
            "{}",
        )]);
        let (name, message) =
            TransferResponseProcessor::transfer_target(&invocation, &response).unwrap();
        assert_eq!(name, "researcher");
        // Missing message falls back to the invocation's user message.
        assert_eq!(message, "original");
    }

    #[tokio::test]
    async fn test_transfer_runs_target_and_ends_invocation() {
        let agent = agent_with_subs();
        let mut invocation = Invocation::new(agent, Message::user("original"));
        let ctx = CancellationToken::new();
        let (tx, mut rx) = agentflow_core::event_channel(16, ctx.clone());

        let response = crate::testing::tool_call_response(vec![ToolCall::function(
            "c1",
            TRANSFER_TOOL_NAME,
            r#"{"agent_name": "researcher", "message": "dig"}"#,
        )]);
        TransferResponseProcessor
            .process_response(&mut invocation, &response, &tx)
            .await
            .unwrap();
        drop(tx);

        assert!(invocation.end_invocation);
        let mut authors = Vec::new();
        while let Some(event) = rx.recv().await {
            authors.push(event.author);
        }
        assert_eq!(authors, ["researcher"]);
    }
}
