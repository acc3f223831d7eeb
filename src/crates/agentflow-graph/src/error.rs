//! Error types for graph construction and execution

use agentflow_checkpoint::CheckpointError;
use thiserror::Error;

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors that can occur while building or executing a graph
#[derive(Error, Debug)]
pub enum GraphError {
    /// Graph structure validation failed at compile time
    #[error("graph validation failed: {0}")]
    Validation(String),

    /// A node's handler returned an error during execution
    #[error("node '{node}' execution failed: {error}")]
    NodeExecution {
        /// Id of the node that failed
        node: String,
        /// Error message from the handler
        error: String,
    },

    /// Execution error without a specific node context
    #[error("execution failed: {0}")]
    Execution(String),

    /// A node requested an interrupt; the latest checkpoint is the
    /// resumption point
    #[error("execution interrupted at node '{node}': {reason}")]
    Interrupted {
        /// Node that requested the interrupt
        node: String,
        /// Reason supplied by the node
        reason: String,
    },

    /// State schema or reducer failure
    #[error("state error: {0}")]
    State(String),

    /// Channel update failure
    #[error("channel error: {0}")]
    Channel(String),

    /// Checkpoint persistence failure
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Execution cancelled by the caller
    #[error("execution cancelled")]
    Cancelled,
}

impl GraphError {
    /// Node execution error helper.
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }
}
