//! Standard request and response processors
//!
//! The LLM agent assembles its flow from these in a fixed order: basic
//! generation config, planning (when a planner is set), instructions,
//! identity, then content. Response processors handle planning
//! post-extraction; transfer detection lives in
//! [`crate::transfer::TransferResponseProcessor`].

use crate::flow::{RequestProcessor, ResponseProcessor};
use crate::planner::PlannerRef;
use agentflow_core::{
    Event, EventSender, Invocation, Message, ObjectKind, Request, Response, Result,
};
use async_trait::async_trait;

/// Baseline generation configuration
pub struct BasicRequestProcessor;

#[async_trait]
impl RequestProcessor for BasicRequestProcessor {
    fn name(&self) -> &str {
        "basic"
    }

    async fn process_request(
        &self,
        _invocation: &mut Invocation,
        request: &mut Request,
        _events: &EventSender,
    ) -> Result<()> {
        request.config.stream = true;
        Ok(())
    }
}

/// Injects the planner's instruction as a system message
pub struct PlanningRequestProcessor {
    planner: PlannerRef,
}

impl PlanningRequestProcessor {
    pub fn new(planner: PlannerRef) -> Self {
        Self { planner }
    }
}

#[async_trait]
impl RequestProcessor for PlanningRequestProcessor {
    fn name(&self) -> &str {
        "planning"
    }

    async fn process_request(
        &self,
        invocation: &mut Invocation,
        request: &mut Request,
        _events: &EventSender,
    ) -> Result<()> {
        if let Some(instruction) = self.planner.planning_instruction(invocation) {
            request.messages.push(Message::system(instruction));
        }
        Ok(())
    }
}

/// Injects agent instructions and an optional global system prompt
pub struct InstructionRequestProcessor {
    instructions: String,
    system_prompt: Option<String>,
}

impl InstructionRequestProcessor {
    pub fn new(instructions: impl Into<String>, system_prompt: Option<String>) -> Self {
        Self {
            instructions: instructions.into(),
            system_prompt,
        }
    }
}

#[async_trait]
impl RequestProcessor for InstructionRequestProcessor {
    fn name(&self) -> &str {
        "instruction"
    }

    async fn process_request(
        &self,
        _invocation: &mut Invocation,
        request: &mut Request,
        _events: &EventSender,
    ) -> Result<()> {
        if let Some(prompt) = &self.system_prompt {
            request.messages.push(Message::system(prompt.clone()));
        }
        if !self.instructions.is_empty() {
            request.messages.push(Message::system(self.instructions.clone()));
        }
        Ok(())
    }
}

/// Tells the model who it is
pub struct IdentityRequestProcessor;

#[async_trait]
impl RequestProcessor for IdentityRequestProcessor {
    fn name(&self) -> &str {
        "identity"
    }

    async fn process_request(
        &self,
        invocation: &mut Invocation,
        request: &mut Request,
        _events: &EventSender,
    ) -> Result<()> {
        let description = invocation
            .agent
            .as_ref()
            .map(|a| a.description().to_string())
            .unwrap_or_default();
        let identity = if description.is_empty() {
            format!("You are {}.", invocation.agent_name)
        } else {
            format!("You are {}. {}", invocation.agent_name, description)
        };
        request.messages.push(Message::system(identity));
        Ok(())
    }
}

/// Assembles the conversation from the session, the invocation's user
/// message, and the working transcript
pub struct ContentRequestProcessor;

#[async_trait]
impl RequestProcessor for ContentRequestProcessor {
    fn name(&self) -> &str {
        "content"
    }

    async fn process_request(
        &self,
        invocation: &mut Invocation,
        request: &mut Request,
        _events: &EventSender,
    ) -> Result<()> {
        let mut messages: Vec<Message> = Vec::new();

        if let Some(session) = &invocation.session {
            let session = session.read().await;
            for event in &session.events {
                let Some(response) = &event.response else {
                    continue;
                };
                if response.is_partial {
                    continue;
                }
                for choice in &response.choices {
                    if let Some(message) = &choice.message {
                        messages.push(message.clone());
                    }
                }
            }
        }

        // Direct runs (no runner appending to the session) still carry the
        // triggering user message.
        if messages.last() != Some(&invocation.message) {
            messages.push(invocation.message.clone());
        }
        messages.extend(invocation.transcript.iter().cloned());

        request.messages.append(&mut messages);
        Ok(())
    }
}

/// Surfaces extracted plans as auxiliary events
pub struct PlanningResponseProcessor {
    planner: PlannerRef,
}

impl PlanningResponseProcessor {
    pub fn new(planner: PlannerRef) -> Self {
        Self { planner }
    }
}

#[async_trait]
impl ResponseProcessor for PlanningResponseProcessor {
    fn name(&self) -> &str {
        "planning"
    }

    async fn process_response(
        &self,
        invocation: &mut Invocation,
        response: &Response,
        events: &EventSender,
    ) -> Result<()> {
        let Some(plan) = self.planner.extract_plan(response) else {
            return Ok(());
        };
        let mut aux = Response::new(ObjectKind::ChatCompletionChunk);
        aux.is_partial = true;
        aux.choices.push(agentflow_core::Choice {
            index: 0,
            delta: Some(agentflow_core::MessageDelta {
                role: Some(agentflow_core::Role::Assistant),
                content: plan,
            }),
            message: None,
            finish_reason: None,
        });
        events
            .send(Event::from_response(
                &invocation.invocation_id,
                &invocation.agent_name,
                aux,
            ))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::EmitterAgent;
    use agentflow_core::{event_channel, AgentRef, Session};
    use std::sync::Arc;
    use tokio::sync::RwLock;
    use tokio_util::sync::CancellationToken;

    fn invocation() -> Invocation {
        let agent: AgentRef = Arc::new(EmitterAgent::new("helper", 0));
        Invocation::new(agent, Message::user("what's up"))
    }

    fn events() -> EventSender {
        event_channel(16, CancellationToken::new()).0
    }

    #[tokio::test]
    async fn test_identity_and_instruction_order() {
        let mut inv = invocation();
        let mut request = Request::default();
        let tx = events();

        BasicRequestProcessor
            .process_request(&mut inv, &mut request, &tx)
            .await
            .unwrap();
        InstructionRequestProcessor::new("Be terse.", None)
            .process_request(&mut inv, &mut request, &tx)
            .await
            .unwrap();
        IdentityRequestProcessor
            .process_request(&mut inv, &mut request, &tx)
            .await
            .unwrap();
        ContentRequestProcessor
            .process_request(&mut inv, &mut request, &tx)
            .await
            .unwrap();

        assert!(request.config.stream);
        assert_eq!(request.messages[0].content, "Be terse.");
        assert!(request.messages[1].content.starts_with("You are helper"));
        assert_eq!(request.messages[2], inv.message);
    }

    #[tokio::test]
    async fn test_content_reads_session_history() {
        let mut inv = invocation();
        let mut session = Session::new("app", "user", "s1");
        session.append_event(Event::from_response(
            "inv-0",
            "user",
            Response::assistant("earlier answer"),
        ));
        inv.session = Some(Arc::new(RwLock::new(session)));
        inv.transcript.push(Message::tool("call-1", "{\"ok\":true}"));

        let mut request = Request::default();
        ContentRequestProcessor
            .process_request(&mut inv, &mut request, &events())
            .await
            .unwrap();

        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[0].content, "earlier answer");
        assert_eq!(request.messages[1], inv.message);
        assert_eq!(request.messages[2].tool_call_id.as_deref(), Some("call-1"));
    }

    #[tokio::test]
    async fn test_planning_processors() {
        let planner: PlannerRef = Arc::new(crate::planner::TagPlanner::new());
        let mut inv = invocation();
        let mut request = Request::default();
        let tx = events();

        PlanningRequestProcessor::new(planner.clone())
            .process_request(&mut inv, &mut request, &tx)
            .await
            .unwrap();
        assert!(request.messages[0].content.contains("/*PLANNING*/"));

        let ctx = CancellationToken::new();
        let (tx, mut rx) = event_channel(16, ctx);
        let response =
            Response::assistant("/*PLANNING*/ think hard /*FINAL_ANSWER*/ forty-two");
        PlanningResponseProcessor::new(planner)
            .process_response(&mut inv, &response, &tx)
            .await
            .unwrap();
        drop(tx);

        let aux = rx.recv().await.unwrap();
        assert!(!aux.done);
        let delta = &aux.response.unwrap().choices[0].delta;
        assert_eq!(delta.as_ref().unwrap().content.trim(), "think hard");
    }
}
