//! The LLM flow pipeline - the inner loop around each model call
//!
//! One "step" is one model call followed by optional tool execution:
//!
//! 1. Run each request processor in order (they mutate the open [`Request`]
//!    and may emit auxiliary events); honor `invocation.end_invocation`.
//! 2. Add the agent's tool declarations to the request.
//! 3. Fire the model; receive its streaming response channel.
//! 4. Per streamed response: emit it as an event, execute any tool calls
//!    into a single synthetic `tool.response` event, then run the response
//!    processors.
//! 5. After the stream drains, stop if the last event was final; otherwise
//!    loop.
//!
//! Processor panics are recovered, reified as `FlowError` events, and
//! terminate the loop. Mid-stream model errors become error events and
//! terminate the loop; retry is a caller concern.

pub mod processors;

use crate::transfer::TRANSFER_TOOL_NAME;
use agentflow_core::{
    call_and_render, AgentError, ErrorKind, Event, EventSender, Invocation, Message, ObjectKind,
    Request, Response, Result, ToolCall, ToolRef,
};
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Mutates the open request before the model fires
#[async_trait]
pub trait RequestProcessor: Send + Sync {
    /// Processor name for diagnostics.
    fn name(&self) -> &str;

    /// Mutate `request`; may emit auxiliary events and set
    /// `invocation.end_invocation`.
    async fn process_request(
        &self,
        invocation: &mut Invocation,
        request: &mut Request,
        events: &EventSender,
    ) -> Result<()>;
}

/// Observes each streamed response after tool handling
#[async_trait]
pub trait ResponseProcessor: Send + Sync {
    /// Processor name for diagnostics.
    fn name(&self) -> &str;

    /// Observe `response`; may emit auxiliary events and set
    /// `invocation.end_invocation`.
    async fn process_response(
        &self,
        invocation: &mut Invocation,
        response: &Response,
        events: &EventSender,
    ) -> Result<()>;
}

/// The step loop around a model, parameterized by its processor chains
pub struct LlmFlow {
    request_processors: Vec<Arc<dyn RequestProcessor>>,
    response_processors: Vec<Arc<dyn ResponseProcessor>>,
    /// Concurrent tool executions per response; 1 = sequential
    tool_concurrency: usize,
}

impl LlmFlow {
    pub fn new(
        request_processors: Vec<Arc<dyn RequestProcessor>>,
        response_processors: Vec<Arc<dyn ResponseProcessor>>,
    ) -> Self {
        Self {
            request_processors,
            response_processors,
            tool_concurrency: 1,
        }
    }

    /// Allow up to `cap` concurrent tool executions within one response.
    pub fn with_tool_concurrency(mut self, cap: usize) -> Self {
        self.tool_concurrency = cap.max(1);
        self
    }

    /// Drive the step loop until a final response, `end_invocation`, or an
    /// error. Events flow through `events`; the caller owns channel closure.
    pub async fn run(
        &self,
        ctx: CancellationToken,
        mut invocation: Invocation,
        events: EventSender,
    ) -> Result<()> {
        let author = invocation.agent_name.clone();

        loop {
            // 1. Preprocess: all processors run, then the end flag is honored.
            let mut request = Request::default();
            for processor in &self.request_processors {
                let outcome = AssertUnwindSafe(processor.process_request(
                    &mut invocation,
                    &mut request,
                    &events,
                ))
                .catch_unwind()
                .await;
                if let Some(message) = processor_failure(processor.name(), outcome) {
                    events
                        .send(Event::error(
                            &invocation.invocation_id,
                            &author,
                            ErrorKind::FlowError,
                            message,
                        ))
                        .await?;
                    return Ok(());
                }
            }
            if invocation.end_invocation {
                return Ok(());
            }

            // 2. Tools travel on the request; the map serves dispatch.
            let tools: Vec<ToolRef> = invocation
                .agent
                .as_ref()
                .map(|agent| agent.tools())
                .unwrap_or_default();
            request.tools = tools.iter().map(|t| t.declaration().clone()).collect();
            let tool_map: HashMap<String, ToolRef> = tools
                .into_iter()
                .map(|t| (t.declaration().name.clone(), t))
                .collect();

            // 3. Fire the model.
            let Some(model) = invocation.model.clone() else {
                events
                    .send(Event::error(
                        &invocation.invocation_id,
                        &author,
                        ErrorKind::ModelError,
                        "no model configured for agent",
                    ))
                    .await?;
                return Ok(());
            };
            let mut stream = match model.generate(ctx.clone(), request).await {
                Ok(stream) => stream,
                Err(e) => {
                    events
                        .send(Event::error(
                            &invocation.invocation_id,
                            &author,
                            ErrorKind::ModelError,
                            e.to_string(),
                        ))
                        .await?;
                    return Ok(());
                }
            };

            // 4. Consume the stream.
            let mut last_final = false;
            let mut saw_response = false;
            loop {
                let item = tokio::select! {
                    item = stream.recv() => item,
                    _ = ctx.cancelled() => return Err(AgentError::Cancelled),
                };
                let Some(item) = item else { break };

                let response = match item {
                    Ok(response) => response,
                    Err(e) => {
                        events
                            .send(Event::error(
                                &invocation.invocation_id,
                                &author,
                                e.kind(),
                                e.to_string(),
                            ))
                            .await?;
                        return Ok(());
                    }
                };

                saw_response = true;
                let event =
                    Event::from_response(&invocation.invocation_id, &author, response.clone());
                last_final = event.is_final();
                events.send(event).await?;

                let calls = response.tool_calls().to_vec();
                if !calls.is_empty() {
                    let tool_response = self
                        .execute_tool_calls(&ctx, &invocation, &calls, &tool_map)
                        .await;
                    self.record_tool_turn(&mut invocation, &response, &tool_response);
                    let tool_event = Event::from_response(
                        &invocation.invocation_id,
                        &author,
                        tool_response,
                    );
                    last_final = tool_event.is_final();
                    events.send(tool_event).await?;
                }

                for processor in &self.response_processors {
                    let outcome = AssertUnwindSafe(processor.process_response(
                        &mut invocation,
                        &response,
                        &events,
                    ))
                    .catch_unwind()
                    .await;
                    if let Some(message) = processor_failure(processor.name(), outcome) {
                        events
                            .send(Event::error(
                                &invocation.invocation_id,
                                &author,
                                ErrorKind::FlowError,
                                message,
                            ))
                            .await?;
                        return Ok(());
                    }
                }
            }

            // 5. Termination.
            if ctx.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            if !saw_response {
                events
                    .send(Event::error(
                        &invocation.invocation_id,
                        &author,
                        ErrorKind::ModelError,
                        "model produced no response",
                    ))
                    .await?;
                return Ok(());
            }
            if last_final || invocation.end_invocation {
                tracing::debug!(agent = %author, "flow complete");
                return Ok(());
            }
        }
    }

    /// Dispatch a response's tool calls, aggregating every result into one
    /// synthetic `tool.response`.
    async fn execute_tool_calls(
        &self,
        ctx: &CancellationToken,
        invocation: &Invocation,
        calls: &[ToolCall],
        tools: &HashMap<String, ToolRef>,
    ) -> Response {
        let semaphore = Arc::new(Semaphore::new(self.tool_concurrency));

        let executions = calls.iter().map(|call| {
            let semaphore = semaphore.clone();
            let ctx = ctx.clone();
            async move {
                let _permit = semaphore.acquire().await.ok();
                let (name, arguments) = resolve_tool_call(call, tools, invocation);
                match tools.get(&name) {
                    None => {
                        tracing::warn!(tool = %name, "tool not found");
                        Message::tool(&call.id, "Error: tool not found")
                    }
                    Some(tool) => {
                        let rendered =
                            call_and_render(ctx, tool.as_ref(), arguments.as_bytes()).await;
                        Message::tool(&call.id, rendered)
                    }
                }
            }
        });

        // join_all preserves call order in the aggregated choices.
        let messages = futures::future::join_all(executions).await;

        let mut response = Response::new(ObjectKind::ToolResponse);
        response.choices = messages
            .into_iter()
            .enumerate()
            .map(|(index, message)| agentflow_core::Choice {
                index: index as u32,
                delta: None,
                message: Some(message),
                finish_reason: None,
            })
            .collect();
        response
    }

    /// Keep the assistant tool-call turn and its results in the working
    /// transcript so the next step's content assembly sees them.
    fn record_tool_turn(
        &self,
        invocation: &mut Invocation,
        model_response: &Response,
        tool_response: &Response,
    ) {
        if let Some(message) = model_response
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
        {
            invocation.transcript.push(message.clone());
        }
        for choice in &tool_response.choices {
            if let Some(message) = &choice.message {
                invocation.transcript.push(message.clone());
            }
        }
    }
}

/// Normalize a processor outcome into an optional failure message,
/// recovering panics.
fn processor_failure(
    name: &str,
    outcome: std::result::Result<Result<()>, Box<dyn std::any::Any + Send>>,
) -> Option<String> {
    match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("processor '{name}' failed: {e}")),
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            Some(format!("processor '{name}' panicked: {detail}"))
        }
    }
}

/// Tool lookup with transfer compatibility: a model may call a sub-agent's
/// name directly; such calls rewrite to `transfer_to_agent` while
/// preserving the original call id.
fn resolve_tool_call(
    call: &ToolCall,
    tools: &HashMap<String, ToolRef>,
    invocation: &Invocation,
) -> (String, String) {
    let name = call.function.name.clone();
    if tools.contains_key(&name) {
        return (name, call.function.arguments.clone());
    }

    let is_sub_agent = invocation
        .agent
        .as_ref()
        .and_then(|agent| agent.find_sub_agent(&name))
        .is_some();
    if tools.contains_key(TRANSFER_TOOL_NAME) && is_sub_agent {
        let parsed: serde_json::Value =
            serde_json::from_str(&call.function.arguments).unwrap_or_default();
        let message = parsed
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| invocation.message.content.clone());
        let rewritten = serde_json::json!({
            "agent_name": name,
            "message": message,
        });
        tracing::debug!(agent = %name, "rewriting direct sub-agent call to transfer tool");
        return (TRANSFER_TOOL_NAME.to_string(), rewritten.to_string());
    }

    (name, call.function.arguments.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::{object_schema, Declaration, FunctionTool};
    use serde_json::json;

    fn echo_tool() -> ToolRef {
        Arc::new(FunctionTool::new(
            Declaration::new(
                "echo",
                "Echo input",
                object_schema(json!({"text": {"type": "string"}}), &["text"]),
            ),
            |args| async move { Ok(json!({"echoed": args["text"]})) },
        ))
    }

    fn flow() -> LlmFlow {
        LlmFlow::new(Vec::new(), Vec::new())
    }

    fn bare_invocation() -> Invocation {
        let agent: agentflow_core::AgentRef =
            Arc::new(crate::testing::EmitterAgent::new("host", 0));
        Invocation::new(agent, Message::user("hi"))
    }

    #[tokio::test]
    async fn test_tool_execution_aggregates_results() {
        let tools: HashMap<String, ToolRef> =
            [("echo".to_string(), echo_tool())].into_iter().collect();
        let calls = vec![
            ToolCall::function("call-1", "echo", r#"{"text": "a"}"#),
            ToolCall::function("call-2", "echo", r#"{"text": "b"}"#),
        ];

        let response = flow()
            .execute_tool_calls(&CancellationToken::new(), &bare_invocation(), &calls, &tools)
            .await;

        assert_eq!(response.object, ObjectKind::ToolResponse);
        assert_eq!(response.choices.len(), 2);
        let first = response.choices[0].message.as_ref().unwrap();
        assert_eq!(first.tool_call_id.as_deref(), Some("call-1"));
        assert!(first.content.contains("\"echoed\":\"a\""));
        let second = response.choices[1].message.as_ref().unwrap();
        assert_eq!(second.tool_call_id.as_deref(), Some("call-2"));
    }

    #[tokio::test]
    async fn test_missing_tool_yields_error_choice() {
        let tools = HashMap::new();
        let calls = vec![ToolCall::function("call-9", "nonexistent", "{}")];

        let response = flow()
            .execute_tool_calls(&CancellationToken::new(), &bare_invocation(), &calls, &tools)
            .await;

        let message = response.choices[0].message.as_ref().unwrap();
        assert_eq!(message.content, "Error: tool not found");
        assert_eq!(message.tool_call_id.as_deref(), Some("call-9"));
    }

    #[tokio::test]
    async fn test_failing_tool_renders_execution_error() {
        let failing: ToolRef = Arc::new(FunctionTool::new(
            Declaration::new("bad", "Always fails", object_schema(json!({}), &[])),
            |_| async move {
                Err(AgentError::ToolExecution {
                    tool: "bad".to_string(),
                    error: "exploded".to_string(),
                })
            },
        ));
        let tools: HashMap<String, ToolRef> =
            [("bad".to_string(), failing)].into_iter().collect();
        let calls = vec![ToolCall::function("call-3", "bad", "{}")];

        let response = flow()
            .execute_tool_calls(&CancellationToken::new(), &bare_invocation(), &calls, &tools)
            .await;
        let message = response.choices[0].message.as_ref().unwrap();
        assert!(message.content.starts_with("Error: tool execution failed:"));
        assert_eq!(message.tool_call_id.as_deref(), Some("call-3"));
    }

    #[test]
    fn test_processor_failure_recovers_panic_message() {
        let panicked: std::result::Result<Result<()>, Box<dyn std::any::Any + Send>> =
            Err(Box::new("boom"));
        let message = processor_failure("content", panicked).unwrap();
        assert!(message.contains("panicked"));
        assert!(message.contains("boom"));

        let ok: std::result::Result<Result<()>, Box<dyn std::any::Any + Send>> = Ok(Ok(()));
        assert!(processor_failure("content", ok).is_none());
    }
}
