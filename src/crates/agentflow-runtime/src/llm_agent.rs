//! The LLM agent: a model, instructions, tools, and optional sub-agents
//!
//! An [`LlmAgent`] owns a configured model and delegates each invocation to
//! an [`LlmFlow`] built from the standard processor chain. With sub-agents
//! configured, `tools()` also exposes the synthesized `transfer_to_agent`
//! tool and the flow detects transfers in responses.

use crate::callbacks::AgentCallbacks;
use crate::flow::processors::{
    BasicRequestProcessor, ContentRequestProcessor, IdentityRequestProcessor,
    InstructionRequestProcessor, PlanningRequestProcessor, PlanningResponseProcessor,
};
use crate::flow::{LlmFlow, RequestProcessor, ResponseProcessor};
use crate::planner::PlannerRef;
use crate::transfer::{transfer_tool, TransferResponseProcessor};
use agentflow_core::{
    event_channel, Agent, AgentRef, Event, EventStream, Invocation, ModelRef, Result, ToolRef,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Configuration-first builder for [`LlmAgent`]
pub struct LlmAgentBuilder {
    name: String,
    description: String,
    instructions: String,
    system_prompt: Option<String>,
    model: Option<ModelRef>,
    planner: Option<PlannerRef>,
    tools: Vec<ToolRef>,
    sub_agents: Vec<AgentRef>,
    callbacks: AgentCallbacks,
    tool_concurrency: usize,
}

impl LlmAgentBuilder {
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_model(mut self, model: ModelRef) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_planner(mut self, planner: PlannerRef) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_tool(mut self, tool: ToolRef) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = ToolRef>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn with_sub_agent(mut self, agent: AgentRef) -> Self {
        self.sub_agents.push(agent);
        self
    }

    pub fn with_sub_agents(mut self, agents: impl IntoIterator<Item = AgentRef>) -> Self {
        self.sub_agents.extend(agents);
        self
    }

    pub fn with_callbacks(mut self, callbacks: AgentCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Concurrent tool executions per response (default 1 = sequential).
    pub fn with_tool_concurrency(mut self, cap: usize) -> Self {
        self.tool_concurrency = cap;
        self
    }

    pub fn build(self) -> LlmAgent {
        // Standard request processor order: basic config, planning,
        // instructions, identity, content.
        let mut request_processors: Vec<Arc<dyn RequestProcessor>> =
            vec![Arc::new(BasicRequestProcessor)];
        if let Some(planner) = &self.planner {
            request_processors.push(Arc::new(PlanningRequestProcessor::new(planner.clone())));
        }
        request_processors.push(Arc::new(InstructionRequestProcessor::new(
            self.instructions.clone(),
            self.system_prompt.clone(),
        )));
        request_processors.push(Arc::new(IdentityRequestProcessor));
        request_processors.push(Arc::new(ContentRequestProcessor));

        let mut response_processors: Vec<Arc<dyn ResponseProcessor>> = Vec::new();
        if let Some(planner) = &self.planner {
            response_processors.push(Arc::new(PlanningResponseProcessor::new(planner.clone())));
        }
        if !self.sub_agents.is_empty() {
            response_processors.push(Arc::new(TransferResponseProcessor));
        }

        let flow = LlmFlow::new(request_processors, response_processors)
            .with_tool_concurrency(self.tool_concurrency);

        LlmAgent {
            name: self.name,
            description: self.description,
            model: self.model,
            tools: self.tools,
            sub_agents: self.sub_agents,
            callbacks: self.callbacks,
            flow: Arc::new(flow),
        }
    }
}

/// A leaf agent backed by a chat model
pub struct LlmAgent {
    name: String,
    description: String,
    model: Option<ModelRef>,
    tools: Vec<ToolRef>,
    sub_agents: Vec<AgentRef>,
    callbacks: AgentCallbacks,
    flow: Arc<LlmFlow>,
}

impl LlmAgent {
    pub fn builder(name: impl Into<String>) -> LlmAgentBuilder {
        LlmAgentBuilder {
            name: name.into(),
            description: String::new(),
            instructions: String::new(),
            system_prompt: None,
            model: None,
            planner: None,
            tools: Vec::new(),
            sub_agents: Vec::new(),
            callbacks: AgentCallbacks::default(),
            tool_concurrency: 1,
        }
    }
}

#[async_trait]
impl Agent for LlmAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn tools(&self) -> Vec<ToolRef> {
        let mut tools = self.tools.clone();
        if !self.sub_agents.is_empty() {
            tools.push(transfer_tool(&self.sub_agents));
        }
        tools
    }

    fn sub_agents(&self) -> Vec<AgentRef> {
        self.sub_agents.clone()
    }

    async fn run(&self, ctx: CancellationToken, invocation: Invocation) -> Result<EventStream> {
        let mut invocation = invocation;
        if invocation.model.is_none() {
            invocation.model = self.model.clone();
        }

        let (tx, rx) = event_channel(invocation.options.channel_buffer_size, ctx.clone());

        // before_agent may short-circuit the whole run.
        if let Some(before) = &self.callbacks.before_agent {
            if let Some(response) = before(&invocation).await {
                let event =
                    Event::from_response(&invocation.invocation_id, &self.name, response)
                        .with_done(true);
                tokio::spawn(async move {
                    let _ = tx.send(event).await;
                });
                return Ok(rx);
            }
        }

        let flow = self.flow.clone();
        let after = self.callbacks.after_agent.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            let invocation_id = invocation.invocation_id.clone();
            match flow.run(ctx, invocation.clone(), tx.clone()).await {
                Ok(()) => {
                    if let Some(after) = after {
                        if let Some(response) = after(&invocation, None).await {
                            let event = Event::from_response(&invocation_id, &name, response)
                                .with_done(true);
                            let _ = tx.send(event).await;
                        }
                    }
                }
                Err(e) => {
                    // Cancellation: drain-free exit, the channel closes
                    // without a trailing error event.
                    tracing::debug!(agent = %name, error = %e, "flow exited");
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{tool_call_response, ScriptedModel};
    use agentflow_core::{
        object_schema, Declaration, FunctionTool, Message, ObjectKind, Response, ToolCall,
    };
    use serde_json::json;

    async fn collect(mut rx: EventStream) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        events
    }

    #[tokio::test]
    async fn test_plain_completion() {
        let model = Arc::new(ScriptedModel::new(
            "m",
            vec![vec![Response::assistant("hello there")]],
        ));
        let agent: AgentRef = Arc::new(
            LlmAgent::builder("helper")
                .with_model(model.clone())
                .with_instructions("Answer briefly.")
                .build(),
        );
        let invocation = Invocation::new(agent.clone(), Message::user("hi"));
        let rx = agent
            .run(CancellationToken::new(), invocation)
            .await
            .unwrap();
        let events = collect(rx).await;

        assert_eq!(events.len(), 1);
        assert!(events[0].done);
        assert!(events[0].is_final());

        // The request carried instructions, identity, and the user message.
        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        let contents: Vec<_> = requests[0].messages.iter().map(|m| m.content.as_str()).collect();
        assert!(contents.contains(&"Answer briefly."));
        assert!(contents.iter().any(|c| c.starts_with("You are helper")));
        assert!(contents.contains(&"hi"));
    }

    #[tokio::test]
    async fn test_tool_loop_then_final() {
        let tool: ToolRef = Arc::new(FunctionTool::new(
            Declaration::new(
                "lookup",
                "Look something up",
                object_schema(json!({"q": {"type": "string"}}), &["q"]),
            ),
            |args| async move { Ok(json!({"answer": format!("result for {}", args["q"]) })) },
        ));
        let model = Arc::new(ScriptedModel::new(
            "m",
            vec![
                vec![tool_call_response(vec![ToolCall::function(
                    "call-1",
                    "lookup",
                    r#"{"q": "rust"}"#,
                )])],
                vec![Response::assistant("rust is a language")],
            ],
        ));
        let agent: AgentRef = Arc::new(
            LlmAgent::builder("helper")
                .with_model(model.clone())
                .with_tool(tool)
                .build(),
        );
        let invocation = Invocation::new(agent.clone(), Message::user("what is rust"));
        let rx = agent
            .run(CancellationToken::new(), invocation)
            .await
            .unwrap();
        let events = collect(rx).await;

        // tool-call completion, tool.response, then the final completion.
        assert_eq!(events.len(), 3);
        let kinds: Vec<_> = events
            .iter()
            .map(|e| e.response.as_ref().unwrap().object)
            .collect();
        assert_eq!(
            kinds,
            [
                ObjectKind::ChatCompletion,
                ObjectKind::ToolResponse,
                ObjectKind::ChatCompletion
            ]
        );
        assert!(events[2].is_final());

        // Second request replays the tool turn from the transcript.
        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        let second = &requests[1];
        assert!(second
            .messages
            .iter()
            .any(|m| m.tool_call_id.as_deref() == Some("call-1")));
        // Tool declarations rode on both requests.
        assert!(requests.iter().all(|r| r.tools.iter().any(|d| d.name == "lookup")));
    }

    #[tokio::test]
    async fn test_no_model_emits_model_error() {
        let agent: AgentRef = Arc::new(LlmAgent::builder("helper").build());
        let invocation = Invocation::new(agent.clone(), Message::user("hi"));
        let rx = agent
            .run(CancellationToken::new(), invocation)
            .await
            .unwrap();
        let events = collect(rx).await;

        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].error.as_ref().unwrap().kind,
            agentflow_core::ErrorKind::ModelError
        );
        assert!(events[0].done);
    }

    #[tokio::test]
    async fn test_before_agent_short_circuits() {
        let callbacks = AgentCallbacks::new().with_before_agent(Arc::new(|_inv| {
            Box::pin(async { Some(Response::assistant("canned")) })
        }));
        let model = Arc::new(ScriptedModel::new(
            "m",
            vec![vec![Response::assistant("real")]],
        ));
        let agent: AgentRef = Arc::new(
            LlmAgent::builder("helper")
                .with_model(model.clone())
                .with_callbacks(callbacks)
                .build(),
        );
        let invocation = Invocation::new(agent.clone(), Message::user("hi"));
        let rx = agent
            .run(CancellationToken::new(), invocation)
            .await
            .unwrap();
        let events = collect(rx).await;

        assert_eq!(events.len(), 1);
        let content = &events[0].response.as_ref().unwrap().choices[0]
            .message
            .as_ref()
            .unwrap()
            .content;
        assert_eq!(content, "canned");
        // The model never fired.
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn test_transfer_tool_synthesized_with_sub_agents() {
        let sub: AgentRef = Arc::new(crate::testing::EmitterAgent::new("specialist", 1));
        let agent = LlmAgent::builder("router").with_sub_agent(sub).build();
        let tools = agent.tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].declaration().name, "transfer_to_agent");
    }

    #[tokio::test]
    async fn test_mid_stream_error_terminates() {
        let agent: AgentRef = Arc::new(
            LlmAgent::builder("helper")
                .with_model(Arc::new(crate::testing::BrokenStreamModel))
                .build(),
        );
        let invocation = Invocation::new(agent.clone(), Message::user("hi"));
        let rx = agent
            .run(CancellationToken::new(), invocation)
            .await
            .unwrap();
        let events = collect(rx).await;

        // One partial chunk, then the reified stream error closes the
        // channel.
        assert_eq!(events.len(), 2);
        assert!(events[0].error.is_none());
        let error = events[1].error.as_ref().unwrap();
        assert_eq!(error.kind, agentflow_core::ErrorKind::ModelError);
        assert!(events[1].done);
    }
}
