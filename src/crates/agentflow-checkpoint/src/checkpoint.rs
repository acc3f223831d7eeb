//! Core checkpoint data structures
//!
//! A [`Checkpoint`] is an immutable snapshot of graph state: channel values,
//! channel versions, and the per-node map of versions already seen. The
//! addressing triple `(lineage_id, namespace, checkpoint_id)` uniquely
//! identifies one snapshot; checkpoints form a DAG through `parent_id`.
//!
//! `lineage_id` groups replays of the same logical conversation; `namespace`
//! isolates branches such as sub-graphs. Ordering within a lineage uses the
//! stored timestamp at nanosecond precision, assigned at write time when
//! zero, with ties broken by checkpoint-id string comparison.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Mapping from channel name to version
pub type ChannelVersions = HashMap<String, i64>;

/// Current unix time in nanoseconds.
pub fn now_unix_ns() -> i64 {
    Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or(i64::MAX)
}

/// How a checkpoint came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Created from the input to a run
    Input,
    /// Created inside the step loop
    Loop,
    /// Created from a manual state update
    Update,
    /// Created as a copy of another checkpoint
    Fork,
}

/// Snapshot of graph state at one step boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique checkpoint id
    pub id: String,

    /// Parent checkpoint id; `None` for roots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Unix nanoseconds; assigned at write when zero
    pub ts: i64,

    /// Channel name to value at snapshot time
    pub channel_values: HashMap<String, Value>,

    /// Channel name to version at snapshot time
    pub channel_versions: ChannelVersions,

    /// Per-node map of channel versions the node has observed
    pub versions_seen: HashMap<String, ChannelVersions>,
}

impl Checkpoint {
    /// A fresh checkpoint with a generated id and zero timestamp.
    pub fn new(
        channel_values: HashMap<String, Value>,
        channel_versions: ChannelVersions,
        versions_seen: HashMap<String, ChannelVersions>,
    ) -> Self {
        Self {
            id: format!("ckpt-{}", Uuid::new_v4()),
            parent_id: None,
            ts: 0,
            channel_values,
            channel_versions,
            versions_seen,
        }
    }

    /// An empty root checkpoint.
    pub fn empty() -> Self {
        Self::new(HashMap::new(), HashMap::new(), HashMap::new())
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_ts(mut self, ts: i64) -> Self {
        self.ts = ts;
        self
    }
}

/// Metadata stored alongside a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Origin of the checkpoint
    pub source: CheckpointSource,

    /// Step number; -1 for the input checkpoint, 0 for the first loop step
    pub step: i64,

    /// Free-form key/value metadata; `List` filters match against these keys
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

impl CheckpointMetadata {
    pub fn new(source: CheckpointSource, step: i64) -> Self {
        Self {
            source,
            step,
            extra: HashMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

impl Default for CheckpointMetadata {
    fn default() -> Self {
        Self::new(CheckpointSource::Loop, 0)
    }
}

/// Addressing triple for checkpoint operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Lineage grouping replays of one logical conversation
    pub lineage_id: String,

    /// Branch discriminator; empty means "search across namespaces"
    #[serde(default)]
    pub namespace: String,

    /// Specific checkpoint; `None` means "latest"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
}

impl CheckpointConfig {
    pub fn new(lineage_id: impl Into<String>) -> Self {
        Self {
            lineage_id: lineage_id.into(),
            namespace: String::new(),
            checkpoint_id: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_checkpoint_id(mut self, id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(id.into());
        self
    }
}

/// A write recorded against a checkpoint before the next one lands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    /// Task (node) that produced the write
    pub task_id: String,

    /// Target channel
    pub channel: String,

    /// Written value
    pub value: Value,

    /// Ordering key; retrieval is ascending by sequence
    pub sequence: i64,

    /// Hierarchical task path, when the task ran inside a sub-graph
    #[serde(default)]
    pub task_path: String,
}

/// A checkpoint bundled with everything a consumer needs to resume
#[derive(Debug, Clone)]
pub struct CheckpointTuple {
    /// Resolved config of this checkpoint (with the real id and namespace)
    pub config: CheckpointConfig,

    /// The checkpoint itself
    pub checkpoint: Checkpoint,

    /// Associated metadata
    pub metadata: CheckpointMetadata,

    /// Config of the parent checkpoint, when one exists. An empty namespace
    /// here means the parent could not be located within one namespace and
    /// consumers must tolerate a cross-namespace read.
    pub parent_config: Option<CheckpointConfig>,

    /// Writes recorded against this checkpoint, ascending by sequence
    pub pending_writes: Vec<PendingWrite>,
}
