//! # agentflow-core - Primitives for the agentflow orchestration runtime
//!
//! Typed envelopes and contracts shared by every other crate in the
//! workspace:
//!
//! - [`event`] - [`Event`] envelopes streamed out of invocations
//! - [`model`] - OpenAI-style [`Response`]/[`Request`] shapes and the
//!   provider-agnostic [`Model`] trait
//! - [`tool`] - [`Tool`] capability (`declaration` + `call(bytes)`),
//!   [`FunctionTool`] adapter, [`ToolSet`] discovery
//! - [`agent`] - the [`Agent`] contract and cancellation-aware event channels
//! - [`invocation`] - [`Invocation`] forking for composites and branches
//! - [`session`] - shared [`Session`] state
//! - [`registry`] - process-wide model/tool/client-config registries
//! - [`error`] - [`AgentError`] and wire-level [`ErrorKind`]s
//!
//! The crate deliberately contains no I/O beyond channel plumbing: concrete
//! LLM clients, tool transports, and persistence backends implement these
//! traits from the outside.

pub mod agent;
pub mod error;
pub mod event;
pub mod invocation;
pub mod model;
pub mod registry;
pub mod session;
pub mod tool;

pub use agent::{event_channel, Agent, AgentRef, EventSender, EventStream, DEFAULT_CHANNEL_BUFFER};
pub use error::{AgentError, ErrorKind, Result};
pub use event::{Event, EventError};
pub use invocation::{Invocation, RunOptions};
pub use model::{
    Choice, FunctionCall, GenerationConfig, Message, MessageDelta, Model, ModelInfo, ModelRef,
    ObjectKind, Request, Response, ResponseError, ResponseStream, Role, ToolCall, Usage,
};
pub use session::{Session, SessionRef};
pub use tool::{
    call_and_render, object_schema, Declaration, FunctionTool, StaticToolSet, StreamableTool,
    Tool, ToolRef, ToolSet,
};
