//! In-memory checkpoint store for development and testing
//!
//! Stores every checkpoint in a `lineage -> namespace -> id` map behind a
//! `tokio::sync::RwLock`. All trait semantics match the durable backends:
//! timestamp assignment, newest-first ordering with id tie-breaks,
//! cross-namespace lookup, and monotonic write sequences. Data is lost on
//! drop; use [`SqliteCheckpointStore`](crate::sqlite::SqliteCheckpointStore)
//! when persistence matters.

use crate::checkpoint::{
    now_unix_ns, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple, PendingWrite,
};
use crate::error::{CheckpointError, Result};
use crate::traits::{
    CheckpointStore, ListFilter, PutFullRequest, PutRequest, PutWritesRequest,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Entry {
    namespace: String,
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
    writes: Vec<PendingWrite>,
}

/// lineage -> namespace -> checkpoint id -> entry
type Storage = HashMap<String, HashMap<String, HashMap<String, Entry>>>;

/// Thread-safe in-memory checkpoint store
///
/// Cloning shares the underlying storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    storage: Arc<RwLock<Storage>>,
    max_per_lineage: Option<usize>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the number of checkpoints kept per lineage; the oldest are
    /// evicted once the bound is exceeded.
    pub fn with_max_per_lineage(mut self, max: usize) -> Self {
        self.max_per_lineage = Some(max);
        self
    }

    /// Number of lineages currently tracked.
    pub async fn lineage_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Total number of checkpoints across all lineages.
    pub async fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .flat_map(|ns| ns.values())
            .map(|ids| ids.len())
            .sum()
    }

    /// Drop everything (test isolation helper).
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }

    fn entry_to_tuple(lineage: &HashMap<String, HashMap<String, Entry>>, entry: &Entry, lineage_id: &str) -> CheckpointTuple {
        let parent_config = entry.checkpoint.parent_id.as_ref().map(|pid| {
            // Locate the parent's namespace by scanning the lineage; an empty
            // namespace signals a cross-namespace read to the consumer.
            let parent_ns = lineage
                .iter()
                .find(|(_, ids)| ids.contains_key(pid))
                .map(|(ns, _)| ns.clone())
                .unwrap_or_default();
            CheckpointConfig {
                lineage_id: lineage_id.to_string(),
                namespace: parent_ns,
                checkpoint_id: Some(pid.clone()),
            }
        });

        let mut writes = entry.writes.clone();
        writes.sort_by_key(|w| w.sequence);

        CheckpointTuple {
            config: CheckpointConfig {
                lineage_id: lineage_id.to_string(),
                namespace: entry.namespace.clone(),
                checkpoint_id: Some(entry.checkpoint.id.clone()),
            },
            checkpoint: entry.checkpoint.clone(),
            metadata: entry.metadata.clone(),
            parent_config,
            pending_writes: writes,
        }
    }

    /// All entries of a lineage, restricted to `namespace` when non-empty.
    fn lineage_entries<'a>(
        lineage: &'a HashMap<String, HashMap<String, Entry>>,
        namespace: &str,
    ) -> Vec<&'a Entry> {
        lineage
            .iter()
            .filter(|(ns, _)| namespace.is_empty() || ns.as_str() == namespace)
            .flat_map(|(_, ids)| ids.values())
            .collect()
    }

    fn latest<'a>(entries: &[&'a Entry]) -> Option<&'a Entry> {
        entries
            .iter()
            .copied()
            .max_by(|a, b| {
                a.checkpoint
                    .ts
                    .cmp(&b.checkpoint.ts)
                    .then_with(|| a.checkpoint.id.cmp(&b.checkpoint.id))
            })
    }

    fn put_locked(storage: &mut Storage, req: PutRequest) -> CheckpointConfig {
        let mut checkpoint = req.checkpoint;
        if checkpoint.ts == 0 {
            checkpoint.ts = now_unix_ns();
        }
        let id = checkpoint.id.clone();
        let lineage_id = req.config.lineage_id.clone();
        let namespace = req.config.namespace.clone();

        let lineage = storage.entry(lineage_id.clone()).or_default();
        lineage.entry(namespace.clone()).or_default().insert(
            id.clone(),
            Entry {
                namespace: namespace.clone(),
                checkpoint,
                metadata: req.metadata,
                writes: Vec::new(),
            },
        );

        CheckpointConfig {
            lineage_id,
            namespace,
            checkpoint_id: Some(id),
        }
    }

    fn evict_locked(storage: &mut Storage, lineage_id: &str, max: usize) {
        let Some(lineage) = storage.get_mut(lineage_id) else {
            return;
        };
        loop {
            let count: usize = lineage.values().map(|ids| ids.len()).sum();
            if count <= max {
                break;
            }
            let oldest = lineage
                .iter()
                .flat_map(|(ns, ids)| ids.values().map(move |e| (ns.clone(), e.checkpoint.id.clone(), e.checkpoint.ts)))
                .min_by(|a, b| a.2.cmp(&b.2).then_with(|| a.1.cmp(&b.1)));
            let Some((ns, id, _)) = oldest else { break };
            tracing::debug!(lineage = %lineage_id, checkpoint = %id, "evicting checkpoint over lineage bound");
            if let Some(ids) = lineage.get_mut(&ns) {
                ids.remove(&id);
                if ids.is_empty() {
                    lineage.remove(&ns);
                }
            }
        }
    }

    fn append_writes(entry: &mut Entry, writes: Vec<PendingWrite>, next_seq: impl Fn(usize, i64) -> i64) {
        for (idx, mut write) in writes.into_iter().enumerate() {
            if write.sequence == 0 {
                write.sequence = next_seq(idx, entry.writes.iter().map(|w| w.sequence).max().unwrap_or(0));
            }
            entry.writes.push(write);
        }
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let storage = self.storage.read().await;
        let Some(lineage) = storage.get(&config.lineage_id) else {
            return Ok(None);
        };

        let entries = Self::lineage_entries(lineage, &config.namespace);
        let found = match &config.checkpoint_id {
            Some(id) => entries.iter().copied().find(|e| &e.checkpoint.id == id),
            None => Self::latest(&entries),
        };

        Ok(found.map(|e| Self::entry_to_tuple(lineage, e, &config.lineage_id)))
    }

    async fn list(
        &self,
        config: &CheckpointConfig,
        filter: &ListFilter,
    ) -> Result<Vec<CheckpointTuple>> {
        let storage = self.storage.read().await;
        let Some(lineage) = storage.get(&config.lineage_id) else {
            return Ok(Vec::new());
        };

        // Resolve the cursor to its timestamp before filtering.
        let before_ts = match &filter.before {
            Some(cursor) => {
                let id = cursor.checkpoint_id.as_ref().ok_or_else(|| {
                    CheckpointError::Invalid("before cursor requires a checkpoint_id".to_string())
                })?;
                Self::lineage_entries(lineage, "")
                    .iter()
                    .find(|e| &e.checkpoint.id == id)
                    .map(|e| e.checkpoint.ts)
            }
            None => None,
        };

        let mut matched: Vec<&Entry> = Self::lineage_entries(lineage, &config.namespace)
            .into_iter()
            .filter(|e| before_ts.is_none_or(|ts| e.checkpoint.ts < ts))
            .filter(|e| {
                filter
                    .extra
                    .iter()
                    .all(|(k, v)| e.metadata.extra.get(k) == Some(v))
            })
            .collect();

        matched.sort_by(|a, b| {
            b.checkpoint
                .ts
                .cmp(&a.checkpoint.ts)
                .then_with(|| b.checkpoint.id.cmp(&a.checkpoint.id))
        });
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }

        Ok(matched
            .into_iter()
            .map(|e| Self::entry_to_tuple(lineage, e, &config.lineage_id))
            .collect())
    }

    async fn put(&self, req: PutRequest) -> Result<CheckpointConfig> {
        let lineage_id = req.config.lineage_id.clone();
        let mut storage = self.storage.write().await;
        let config = Self::put_locked(&mut storage, req);
        if let Some(max) = self.max_per_lineage {
            Self::evict_locked(&mut storage, &lineage_id, max);
        }
        Ok(config)
    }

    async fn put_writes(&self, req: PutWritesRequest) -> Result<()> {
        let checkpoint_id = req
            .config
            .checkpoint_id
            .clone()
            .ok_or_else(|| CheckpointError::Invalid("checkpoint_id is required".to_string()))?;

        let mut storage = self.storage.write().await;
        let entry = storage
            .get_mut(&req.config.lineage_id)
            .and_then(|lineage| {
                lineage
                    .iter_mut()
                    .filter(|(ns, _)| {
                        req.config.namespace.is_empty() || ns.as_str() == req.config.namespace
                    })
                    .find_map(|(_, ids)| ids.get_mut(&checkpoint_id))
            })
            .ok_or_else(|| CheckpointError::NotFound(checkpoint_id.clone()))?;

        // Zero sequences default to the write's index in the request.
        Self::append_writes(entry, req.writes, |idx, _| idx as i64);
        Ok(())
    }

    async fn put_full(&self, req: PutFullRequest) -> Result<CheckpointConfig> {
        let lineage_id = req.config.lineage_id.clone();
        let mut storage = self.storage.write().await;
        let config = Self::put_locked(
            &mut storage,
            PutRequest {
                config: req.config,
                checkpoint: req.checkpoint,
                metadata: req.metadata,
                new_versions: req.new_versions,
            },
        );

        let checkpoint_id = config.checkpoint_id.clone().unwrap_or_default();
        if let Some(entry) = storage
            .get_mut(&config.lineage_id)
            .and_then(|l| l.get_mut(&config.namespace))
            .and_then(|ids| ids.get_mut(&checkpoint_id))
        {
            // Zero sequences receive monotonically increasing values.
            let mut seq = entry.writes.iter().map(|w| w.sequence).max().unwrap_or(0);
            for mut write in req.writes {
                if write.sequence == 0 {
                    seq += 1;
                    write.sequence = seq;
                } else {
                    seq = seq.max(write.sequence);
                }
                entry.writes.push(write);
            }
        }

        if let Some(max) = self.max_per_lineage {
            Self::evict_locked(&mut storage, &lineage_id, max);
        }
        Ok(config)
    }

    async fn delete_lineage(&self, lineage_id: &str) -> Result<()> {
        self.storage.write().await.remove(lineage_id);
        Ok(())
    }
}
