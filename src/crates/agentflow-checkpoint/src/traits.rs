//! The `CheckpointStore` trait - contract for persistence backends
//!
//! A store keeps an ordered, lineage/namespace-partitioned history of graph
//! snapshots plus the pending writes recorded between them. Two backends ship
//! in this crate: [`InMemoryCheckpointStore`](crate::memory::InMemoryCheckpointStore)
//! for development and tests, and
//! [`SqliteCheckpointStore`](crate::sqlite::SqliteCheckpointStore) for durable
//! single-node deployments. PostgreSQL / Redis backends implement the same
//! trait from the outside.
//!
//! # Contract summary
//!
//! - `(lineage_id, namespace, checkpoint_id)` uniquely identifies a snapshot.
//! - `get`/`get_tuple` with an empty namespace search across namespaces and
//!   return the latest snapshot in the lineage.
//! - `list` orders newest first by `(ts, checkpoint_id)` descending; the
//!   `before` cursor resolves its timestamp first, then filters strictly
//!   less.
//! - A zero timestamp on `put` is rewritten to the current time in unix
//!   nanoseconds.
//! - `put_full` persists the checkpoint and its writes atomically; writes
//!   with a zero sequence receive a monotonically increasing one.
//! - Pending writes are always retrieved ascending by sequence.

use crate::checkpoint::{
    ChannelVersions, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple,
    PendingWrite,
};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Filter applied by [`CheckpointStore::list`]
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Equality constraints on metadata `extra` keys
    pub extra: HashMap<String, Value>,

    /// Only checkpoints strictly older than this one
    pub before: Option<CheckpointConfig>,

    /// Maximum number of results
    pub limit: Option<usize>,
}

/// Request for [`CheckpointStore::put`]
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub config: CheckpointConfig,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    pub new_versions: ChannelVersions,
}

/// Request for [`CheckpointStore::put_writes`]
#[derive(Debug, Clone)]
pub struct PutWritesRequest {
    pub config: CheckpointConfig,
    pub writes: Vec<PendingWrite>,
}

/// Request for [`CheckpointStore::put_full`]
#[derive(Debug, Clone)]
pub struct PutFullRequest {
    pub config: CheckpointConfig,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    pub new_versions: ChannelVersions,
    pub writes: Vec<PendingWrite>,
}

/// Storage backend for graph checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Latest checkpoint for `(lineage, namespace)`, or the latest across
    /// namespaces when the namespace is empty.
    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        Ok(self.get_tuple(config).await?.map(|t| t.checkpoint))
    }

    /// Full tuple: config, checkpoint, metadata, parent config, and pending
    /// writes ascending by sequence.
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>>;

    /// Checkpoints of a lineage (namespace optional), newest first.
    async fn list(
        &self,
        config: &CheckpointConfig,
        filter: &ListFilter,
    ) -> Result<Vec<CheckpointTuple>>;

    /// Upsert a single checkpoint, returning its resolved config.
    async fn put(&self, req: PutRequest) -> Result<CheckpointConfig>;

    /// Append pending writes for an existing checkpoint. A zero sequence
    /// defaults to the write's index within the request.
    async fn put_writes(&self, req: PutWritesRequest) -> Result<()>;

    /// Atomic `put` + `put_writes`; zero sequences are assigned monotonic
    /// values.
    async fn put_full(&self, req: PutFullRequest) -> Result<CheckpointConfig>;

    /// Remove all checkpoints and writes of a lineage.
    async fn delete_lineage(&self, lineage_id: &str) -> Result<()>;

    /// Release resources. Idempotent.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
