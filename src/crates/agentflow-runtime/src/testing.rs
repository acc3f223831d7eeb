//! Mock agents and models for tests
//!
//! Deterministic stand-ins used by this crate's unit and integration tests.
//! Public so downstream crates can reuse them when testing their own
//! composites.

use agentflow_core::{
    event_channel, Agent, AgentError, Event, EventStream, Invocation, Message, Model, ModelInfo,
    ObjectKind, Request, Response, ResponseStream, Result,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Emits `count` plain response events (content = event index), then closes.
pub struct EmitterAgent {
    name: String,
    count: usize,
}

impl EmitterAgent {
    pub fn new(name: impl Into<String>, count: usize) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

#[async_trait]
impl Agent for EmitterAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: CancellationToken, invocation: Invocation) -> Result<EventStream> {
        let (tx, rx) = event_channel(invocation.options.channel_buffer_size, ctx);
        let name = self.name.clone();
        let count = self.count;
        tokio::spawn(async move {
            for i in 0..count {
                let mut response = Response::assistant(i.to_string());
                response.is_partial = true;
                let event = Event::from_response(&invocation.invocation_id, &name, response);
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

/// `run` fails synchronously (setup error).
pub struct FailingAgent {
    name: String,
}

impl FailingAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Agent for FailingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: CancellationToken, _invocation: Invocation) -> Result<EventStream> {
        Err(AgentError::Flow(format!("{} refused to start", self.name)))
    }
}

/// Emits a single error event then closes (escalation trigger).
pub struct ErrorEventAgent {
    name: String,
}

impl ErrorEventAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Agent for ErrorEventAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: CancellationToken, invocation: Invocation) -> Result<EventStream> {
        let (tx, rx) = event_channel(invocation.options.channel_buffer_size, ctx);
        let name = self.name.clone();
        tokio::spawn(async move {
            let _ = tx
                .send(Event::error(
                    &invocation.invocation_id,
                    &name,
                    agentflow_core::ErrorKind::FlowError,
                    "escalating",
                ))
                .await;
        });
        Ok(rx)
    }
}

/// Plays back scripted responses, one script (list of responses) per
/// `generate` call. Exhausted scripts yield a plain "done" completion.
/// Records every request for assertions.
#[derive(Clone)]
pub struct ScriptedModel {
    name: String,
    scripts: Arc<Mutex<Vec<Vec<Response>>>>,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl ScriptedModel {
    pub fn new(name: impl Into<String>, scripts: Vec<Vec<Response>>) -> Self {
        Self {
            name: name.into(),
            scripts: Arc::new(Mutex::new(scripts)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Requests captured so far, in call order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl Model for ScriptedModel {
    fn info(&self) -> ModelInfo {
        ModelInfo {
            name: self.name.clone(),
            provider: "scripted".to_string(),
        }
    }

    async fn generate(&self, ctx: CancellationToken, request: Request) -> Result<ResponseStream> {
        self.requests.lock().expect("requests lock").push(request);

        let script = {
            let mut scripts = self.scripts.lock().expect("scripts lock");
            if scripts.is_empty() {
                vec![Response::assistant("done")]
            } else {
                scripts.remove(0)
            }
        };

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for response in script {
                tokio::select! {
                    res = tx.send(Ok(response)) => {
                        if res.is_err() {
                            break;
                        }
                    }
                    _ = ctx.cancelled() => break,
                }
            }
        });
        Ok(rx)
    }
}

/// A model whose stream yields one mid-flight error.
pub struct BrokenStreamModel;

#[async_trait]
impl Model for BrokenStreamModel {
    fn info(&self) -> ModelInfo {
        ModelInfo {
            name: "broken".to_string(),
            provider: "scripted".to_string(),
        }
    }

    async fn generate(&self, _ctx: CancellationToken, _request: Request) -> Result<ResponseStream> {
        let (tx, rx) = mpsc::channel(2);
        tokio::spawn(async move {
            let mut chunk = Response::new(ObjectKind::ChatCompletionChunk);
            chunk.is_partial = true;
            let _ = tx.send(Ok(chunk)).await;
            let _ = tx
                .send(Err(AgentError::Model("stream torn down".to_string())))
                .await;
        });
        Ok(rx)
    }
}

/// A completion response that requests the given tool calls.
pub fn tool_call_response(calls: Vec<agentflow_core::ToolCall>) -> Response {
    let mut response = Response::new(ObjectKind::ChatCompletion);
    let mut message = Message::assistant("");
    message.tool_calls = Some(calls);
    response.choices.push(agentflow_core::Choice {
        index: 0,
        delta: None,
        message: Some(message),
        finish_reason: Some("tool_calls".to_string()),
    });
    response
}
