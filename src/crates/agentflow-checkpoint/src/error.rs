//! Error types for checkpoint operations

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur during checkpoint operations
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Checkpoint not found
    #[error("checkpoint not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Binary serialization error
    #[error("binary serialization error: {0}")]
    BinarySerialization(#[from] bincode::Error),

    /// Storage backend error
    #[error("storage error: {0}")]
    Storage(String),

    /// SQLite error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Invalid request or checkpoint data
    #[error("invalid checkpoint: {0}")]
    Invalid(String),

    /// Mutex poisoned while accessing the connection
    #[error("lock error: {0}")]
    Lock(String),

    /// Blocking task failed to complete
    #[error("task error: {0}")]
    Task(String),

    /// I/O error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
