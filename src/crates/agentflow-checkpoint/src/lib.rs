//! # agentflow-checkpoint - State Persistence for Graph Execution
//!
//! Durable, ordered, lineage/namespace-partitioned storage for graph state
//! snapshots and pending writes. Checkpoints enable deterministic replay,
//! fault recovery, interrupt/resume, and branching timelines.
//!
//! ## Core Concepts
//!
//! - A [`Checkpoint`] snapshots channel values, channel versions, and the
//!   per-node `versions_seen` map after one step.
//! - `(lineage_id, namespace, checkpoint_id)` - the [`CheckpointConfig`]
//!   triple - uniquely identifies one snapshot. Lineages group replays of one
//!   logical conversation; namespaces isolate branches such as sub-graphs.
//! - Checkpoints form a DAG via `parent_id`; ordering within a lineage is by
//!   timestamp (unix nanoseconds) with checkpoint-id tie-breaks.
//! - [`PendingWrite`]s record per-task channel writes between checkpoints and
//!   are always retrieved ascending by sequence.
//!
//! ## Backends
//!
//! - [`InMemoryCheckpointStore`] - development and tests; optional
//!   per-lineage bound with oldest-first eviction.
//! - [`SqliteCheckpointStore`] - durable single-node storage over `rusqlite`,
//!   with `put_full` landing a checkpoint and its writes in one transaction.
//!
//! Backends for other systems implement [`CheckpointStore`] externally.

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod serializer;
pub mod sqlite;
pub mod traits;

pub use checkpoint::{
    now_unix_ns, ChannelVersions, Checkpoint, CheckpointConfig, CheckpointMetadata,
    CheckpointSource, CheckpointTuple, PendingWrite,
};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointStore;
pub use serializer::{BincodeSerializer, JsonSerializer, SerializerProtocol};
pub use sqlite::SqliteCheckpointStore;
pub use traits::{CheckpointStore, ListFilter, PutFullRequest, PutRequest, PutWritesRequest};
