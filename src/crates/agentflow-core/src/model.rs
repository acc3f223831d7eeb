//! Model request/response types and the `Model` trait
//!
//! The runtime is an **orchestration framework**, not an LLM client library.
//! Concrete HTTP clients live outside the core; this module defines the
//! provider-agnostic wire shapes (OpenAI-style chat completion objects) and
//! the [`Model`] trait the flow pipeline consumes.
//!
//! A [`Model`] call returns a bounded stream of [`Response`] values. Streamed
//! chunks carry `is_partial = true`; the terminal response of a call is
//! non-partial and may carry tool calls and usage accounting.

use crate::error::Result;
use crate::tool::Declaration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Object kind tag carried by every [`Response`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Complete chat response
    #[serde(rename = "chat.completion")]
    ChatCompletion,
    /// Streamed partial chat response
    #[serde(rename = "chat.completion.chunk")]
    ChatCompletionChunk,
    /// Aggregated tool execution results
    #[serde(rename = "tool.response")]
    ToolResponse,
    /// A graph node started executing
    #[serde(rename = "graph.node.start")]
    GraphNodeStart,
    /// A graph node finished executing
    #[serde(rename = "graph.node.complete")]
    GraphNodeComplete,
    /// A graph node handler failed
    #[serde(rename = "graph.node.error")]
    GraphNodeError,
    /// Post-processing code execution output
    #[serde(rename = "postprocessing.code_execution")]
    CodeExecution,
    /// Error marker object
    #[serde(rename = "error")]
    Error,
}

/// Role of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Reference to a registered tool inside a model response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id; preserved through dispatch so the model
    /// can match results to calls
    pub id: String,

    /// Always `"function"`
    #[serde(rename = "type")]
    pub kind: String,

    /// The function being invoked
    pub function: FunctionCall,
}

impl ToolCall {
    /// Create a function tool call with raw JSON arguments.
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Function name plus raw JSON argument string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Registered tool name
    pub name: String,
    /// Raw JSON arguments as produced by the model
    pub arguments: String,
}

/// One chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Speaker role
    pub role: Role,

    /// Text content
    #[serde(default)]
    pub content: String,

    /// For `Role::Tool` messages, the id of the call being answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// For assistant messages requesting tool execution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// A tool result message answering `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    /// Whether this message requests tool execution.
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }
}

/// Incremental content for streamed chunks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: String,
}

/// One alternative completion within a response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    /// Position within the response
    pub index: u32,

    /// Incremental content (streamed chunks)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<MessageDelta>,

    /// Complete message (terminal responses)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,

    /// Why the model stopped, when it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl Choice {
    /// Tool calls requested by this choice, if any.
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.message
            .as_ref()
            .and_then(|m| m.tool_calls.as_deref())
            .unwrap_or(&[])
    }
}

/// Token usage accounting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Structured error descriptor carried inside a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    /// Machine-readable error type
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable description
    pub message: String,
}

/// A model response or synthesized runtime response
///
/// The same envelope carries chat completions, streamed chunks, aggregated
/// tool results, and graph node lifecycle markers; `object` discriminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Response id
    pub id: String,

    /// Object kind tag
    pub object: ObjectKind,

    /// Unix seconds
    pub created: i64,

    /// Producing model name (empty for synthesized responses)
    #[serde(default)]
    pub model: String,

    /// Alternative completions; synthesized responses use index order
    #[serde(default)]
    pub choices: Vec<Choice>,

    /// Token accounting, when the provider reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// True for streamed chunks that will be followed by more data
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_partial: bool,

    /// Error descriptor for error-kind responses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,

    /// Creation time at nanosecond precision
    pub timestamp: DateTime<Utc>,
}

impl Response {
    /// Create an empty response with the given object kind.
    pub fn new(object: ObjectKind) -> Self {
        let now = Utc::now();
        Self {
            id: format!("resp-{}", uuid::Uuid::new_v4()),
            object,
            created: now.timestamp(),
            model: String::new(),
            choices: Vec::new(),
            usage: None,
            is_partial: false,
            error: None,
            timestamp: now,
        }
    }

    /// A complete assistant response with a single text choice.
    pub fn assistant(content: impl Into<String>) -> Self {
        let mut resp = Self::new(ObjectKind::ChatCompletion);
        resp.choices.push(Choice {
            index: 0,
            delta: None,
            message: Some(Message::assistant(content)),
            finish_reason: Some("stop".to_string()),
        });
        resp
    }

    /// Tool calls requested by the first choice, if any.
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.choices.first().map(|c| c.tool_calls()).unwrap_or(&[])
    }
}

/// Generation parameters attached to a [`Request`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    /// Request streamed chunks from the provider
    #[serde(default)]
    pub stream: bool,
}

/// An open request assembled by the flow's request processors
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Conversation history, oldest first
    pub messages: Vec<Message>,

    /// Generation parameters
    pub config: GenerationConfig,

    /// Tools the model may call
    pub tools: Vec<Declaration>,
}

impl Request {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }
}

/// Static information about a model implementation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    /// Model identifier, e.g. `gpt-4o-mini`
    pub name: String,
    /// Provider label, e.g. `openai`
    pub provider: String,
}

/// Bounded stream of responses produced by one model call
pub type ResponseStream = mpsc::Receiver<Result<Response>>;

/// Provider-agnostic chat model
///
/// Implementations convert [`Request`] to their provider's format, issue the
/// call, and feed [`Response`] values into the returned channel. Setup
/// failures (bad config, connection refused) are returned synchronously;
/// mid-stream failures are sent as `Err` items.
#[async_trait]
pub trait Model: Send + Sync {
    /// Static model information.
    fn info(&self) -> ModelInfo;

    /// Fire a generation call, returning its response stream.
    ///
    /// The stream ends when the sender is dropped. Implementations must stop
    /// producing when `ctx` is cancelled.
    async fn generate(&self, ctx: CancellationToken, request: Request) -> Result<ResponseStream>;
}

/// Shared model handle
pub type ModelRef = Arc<dyn Model>;
