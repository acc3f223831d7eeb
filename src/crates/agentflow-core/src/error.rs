//! Error types shared across the agentflow runtime

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Classification of runtime errors
///
/// The kind travels on the wire inside error events, so variants use
/// stable string names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Processor chain, tool dispatch, or composite orchestration failure
    FlowError,
    /// Model setup or streaming failure
    ModelError,
    /// Requested tool is not registered
    ToolNotFound,
    /// A tool handler returned an error
    ToolExecution,
    /// Serialization / deserialization failure
    MarshalError,
    /// The invocation context was cancelled
    CancelledError,
    /// A graph node handler failed
    GraphNodeError,
    /// Checkpoint persistence failure
    CheckpointError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::FlowError => "FlowError",
            ErrorKind::ModelError => "ModelError",
            ErrorKind::ToolNotFound => "ToolNotFound",
            ErrorKind::ToolExecution => "ToolExecution",
            ErrorKind::MarshalError => "MarshalError",
            ErrorKind::CancelledError => "CancelledError",
            ErrorKind::GraphNodeError => "GraphNodeError",
            ErrorKind::CheckpointError => "CheckpointError",
        };
        f.write_str(s)
    }
}

/// Errors produced by agents, flows, and tools
#[derive(Debug, Error)]
pub enum AgentError {
    /// Orchestration failure in a composite agent or the flow pipeline
    #[error("flow error: {0}")]
    Flow(String),

    /// Model setup or mid-stream failure
    #[error("model error: {0}")]
    Model(String),

    /// Tool lookup failed
    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    /// Tool handler returned an error
    #[error("tool '{tool}' execution failed: {error}")]
    ToolExecution {
        /// Tool name
        tool: String,
        /// Underlying error message
        error: String,
    },

    /// Serialization failure
    #[error("marshal error: {0}")]
    Marshal(#[from] serde_json::Error),

    /// The invocation was cancelled
    #[error("invocation cancelled")]
    Cancelled,

    /// Graph node handler failure
    #[error("node '{node}' failed: {error}")]
    GraphNode {
        /// Node id
        node: String,
        /// Underlying error message
        error: String,
    },

    /// Checkpoint store failure
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
}

impl AgentError {
    /// Map this error to its wire-level kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Flow(_) => ErrorKind::FlowError,
            AgentError::Model(_) => ErrorKind::ModelError,
            AgentError::ToolNotFound(_) => ErrorKind::ToolNotFound,
            AgentError::ToolExecution { .. } => ErrorKind::ToolExecution,
            AgentError::Marshal(_) => ErrorKind::MarshalError,
            AgentError::Cancelled => ErrorKind::CancelledError,
            AgentError::GraphNode { .. } => ErrorKind::GraphNodeError,
            AgentError::Checkpoint(_) => ErrorKind::CheckpointError,
        }
    }
}
