//! SQLite-backed checkpoint store
//!
//! [`SqliteCheckpointStore`] persists checkpoints in a SQLite database,
//! surviving process restarts. Uses [`rusqlite`] for synchronous access,
//! bridged to async via [`tokio::task::spawn_blocking`].
//!
//! # Storage Model
//!
//! Checkpoints and metadata are stored as opaque JSON blobs in the
//! `checkpoints` table, keyed by `(lineage_id, checkpoint_ns,
//! checkpoint_id)`. Pending writes live in `checkpoint_writes`, keyed by
//! `(lineage_id, checkpoint_ns, checkpoint_id, task_id, idx)` and read back
//! `ORDER BY seq`. `put_full` lands the checkpoint and its writes in a
//! single transaction. WAL journal mode and an index on `(lineage_id, ts)`
//! keep latest-lookups and `before`-cursor queries efficient.

use crate::checkpoint::{
    now_unix_ns, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple, PendingWrite,
};
use crate::error::{CheckpointError, Result};
use crate::serializer::{JsonSerializer, SerializerProtocol};
use crate::traits::{
    CheckpointStore, ListFilter, PutFullRequest, PutRequest, PutWritesRequest,
};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// SQLite-backed checkpoint store for durable single-node deployments
///
/// Cloneable via `Arc<Mutex<Connection>>`; multiple handles may share one
/// database. Schema is auto-created on construction. All blocking I/O is
/// offloaded to the tokio blocking thread pool.
#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCheckpointStore {
    /// Opens (or creates) a database at `path` and initializes the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path.as_ref())?)
    }

    /// Opens an ephemeral in-memory database (data lost on drop).
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wraps an existing [`Connection`], applying pragmas and schema setup.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\
             PRAGMA foreign_keys = ON;\
             PRAGMA busy_timeout = 5000;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                lineage_id           TEXT    NOT NULL,
                checkpoint_ns        TEXT    NOT NULL,
                checkpoint_id        TEXT    NOT NULL,
                parent_checkpoint_id TEXT,
                ts                   INTEGER NOT NULL,
                checkpoint_json      BLOB    NOT NULL,
                metadata_json        BLOB    NOT NULL,
                PRIMARY KEY (lineage_id, checkpoint_ns, checkpoint_id)
            );

            CREATE TABLE IF NOT EXISTS checkpoint_writes (
                lineage_id    TEXT    NOT NULL,
                checkpoint_ns TEXT    NOT NULL,
                checkpoint_id TEXT    NOT NULL,
                task_id       TEXT    NOT NULL,
                idx           INTEGER NOT NULL,
                channel       TEXT    NOT NULL,
                value_json    BLOB    NOT NULL,
                task_path     TEXT    NOT NULL DEFAULT '',
                seq           INTEGER NOT NULL,
                PRIMARY KEY (lineage_id, checkpoint_ns, checkpoint_id, task_id, idx)
            );

            CREATE INDEX IF NOT EXISTS idx_checkpoints_lineage_ts
            ON checkpoints (lineage_id, ts);",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Bridges a synchronous closure onto the tokio blocking thread pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| CheckpointError::Lock(e.to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| CheckpointError::Task(e.to_string()))?
    }

    fn row_to_tuple(
        conn: &Connection,
        lineage_id: &str,
        namespace: &str,
        checkpoint_json: &[u8],
        metadata_json: &[u8],
        parent_id: Option<String>,
    ) -> Result<CheckpointTuple> {
        let serializer = JsonSerializer;
        let checkpoint: Checkpoint = serializer.loads(checkpoint_json)?;
        let metadata: CheckpointMetadata = serializer.loads(metadata_json)?;

        let parent_config = match parent_id {
            Some(pid) => {
                // Locate the parent's namespace within the lineage; an empty
                // namespace marks a cross-namespace read.
                let parent_ns: Option<String> = conn
                    .query_row(
                        "SELECT checkpoint_ns FROM checkpoints \
                         WHERE lineage_id = ?1 AND checkpoint_id = ?2 \
                         LIMIT 1",
                        params![lineage_id, pid],
                        |row| row.get(0),
                    )
                    .optional()?;
                Some(CheckpointConfig {
                    lineage_id: lineage_id.to_string(),
                    namespace: parent_ns.unwrap_or_default(),
                    checkpoint_id: Some(pid),
                })
            }
            None => None,
        };

        let mut stmt = conn.prepare(
            "SELECT task_id, channel, value_json, task_path, seq \
             FROM checkpoint_writes \
             WHERE lineage_id = ?1 AND checkpoint_ns = ?2 AND checkpoint_id = ?3 \
             ORDER BY seq ASC",
        )?;
        let pending_writes = stmt
            .query_map(params![lineage_id, namespace, checkpoint.id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(task_id, channel, value_json, task_path, seq)| {
                Ok(PendingWrite {
                    task_id,
                    channel,
                    value: serde_json::from_slice(&value_json)?,
                    sequence: seq,
                    task_path,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CheckpointTuple {
            config: CheckpointConfig {
                lineage_id: lineage_id.to_string(),
                namespace: namespace.to_string(),
                checkpoint_id: Some(checkpoint.id.clone()),
            },
            checkpoint,
            metadata,
            parent_config,
            pending_writes,
        })
    }

    fn upsert_checkpoint(
        conn: &Connection,
        config: &CheckpointConfig,
        checkpoint: &mut Checkpoint,
        metadata: &CheckpointMetadata,
    ) -> Result<()> {
        if checkpoint.ts == 0 {
            checkpoint.ts = now_unix_ns();
        }
        let serializer = JsonSerializer;
        let checkpoint_json = serializer.dumps(checkpoint)?;
        let metadata_json = serializer.dumps(metadata)?;

        conn.execute(
            "INSERT INTO checkpoints \
             (lineage_id, checkpoint_ns, checkpoint_id, parent_checkpoint_id, ts, checkpoint_json, metadata_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT (lineage_id, checkpoint_ns, checkpoint_id) DO UPDATE SET \
               parent_checkpoint_id = excluded.parent_checkpoint_id, \
               ts = excluded.ts, \
               checkpoint_json = excluded.checkpoint_json, \
               metadata_json = excluded.metadata_json",
            params![
                config.lineage_id,
                config.namespace,
                checkpoint.id,
                checkpoint.parent_id,
                checkpoint.ts,
                checkpoint_json,
                metadata_json,
            ],
        )?;
        Ok(())
    }

    fn insert_writes(
        conn: &Connection,
        config: &CheckpointConfig,
        checkpoint_id: &str,
        writes: Vec<PendingWrite>,
        monotonic: bool,
    ) -> Result<()> {
        let mut seq: i64 = if monotonic {
            conn.query_row(
                "SELECT COALESCE(MAX(seq), 0) FROM checkpoint_writes \
                 WHERE lineage_id = ?1 AND checkpoint_ns = ?2 AND checkpoint_id = ?3",
                params![config.lineage_id, config.namespace, checkpoint_id],
                |row| row.get(0),
            )?
        } else {
            0
        };

        let mut stmt = conn.prepare(
            "INSERT OR REPLACE INTO checkpoint_writes \
             (lineage_id, checkpoint_ns, checkpoint_id, task_id, idx, channel, value_json, task_path, seq) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for (idx, mut write) in writes.into_iter().enumerate() {
            if write.sequence == 0 {
                write.sequence = if monotonic {
                    seq += 1;
                    seq
                } else {
                    idx as i64
                };
            } else if monotonic {
                seq = seq.max(write.sequence);
            }
            stmt.execute(params![
                config.lineage_id,
                config.namespace,
                checkpoint_id,
                write.task_id,
                idx as i64,
                write.channel,
                serde_json::to_vec(&write.value)?,
                write.task_path,
                write.sequence,
            ])?;
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let config = config.clone();
        self.blocking(move |conn| {
            // Cross-namespace lookup when the namespace is empty.
            let row = match (&config.checkpoint_id, config.namespace.is_empty()) {
                (Some(id), false) => conn
                    .query_row(
                        "SELECT checkpoint_ns, checkpoint_json, metadata_json, parent_checkpoint_id \
                         FROM checkpoints \
                         WHERE lineage_id = ?1 AND checkpoint_ns = ?2 AND checkpoint_id = ?3",
                        params![config.lineage_id, config.namespace, id],
                        row_fields,
                    )
                    .optional()?,
                (Some(id), true) => conn
                    .query_row(
                        "SELECT checkpoint_ns, checkpoint_json, metadata_json, parent_checkpoint_id \
                         FROM checkpoints \
                         WHERE lineage_id = ?1 AND checkpoint_id = ?2 \
                         ORDER BY ts DESC, checkpoint_id DESC LIMIT 1",
                        params![config.lineage_id, id],
                        row_fields,
                    )
                    .optional()?,
                (None, false) => conn
                    .query_row(
                        "SELECT checkpoint_ns, checkpoint_json, metadata_json, parent_checkpoint_id \
                         FROM checkpoints \
                         WHERE lineage_id = ?1 AND checkpoint_ns = ?2 \
                         ORDER BY ts DESC, checkpoint_id DESC LIMIT 1",
                        params![config.lineage_id, config.namespace],
                        row_fields,
                    )
                    .optional()?,
                (None, true) => conn
                    .query_row(
                        "SELECT checkpoint_ns, checkpoint_json, metadata_json, parent_checkpoint_id \
                         FROM checkpoints \
                         WHERE lineage_id = ?1 \
                         ORDER BY ts DESC, checkpoint_id DESC LIMIT 1",
                        params![config.lineage_id],
                        row_fields,
                    )
                    .optional()?,
            };

            match row {
                Some((ns, checkpoint_json, metadata_json, parent_id)) => Ok(Some(
                    Self::row_to_tuple(conn, &config.lineage_id, &ns, &checkpoint_json, &metadata_json, parent_id)?,
                )),
                None => Ok(None),
            }
        })
        .await
    }

    async fn list(
        &self,
        config: &CheckpointConfig,
        filter: &ListFilter,
    ) -> Result<Vec<CheckpointTuple>> {
        let config = config.clone();
        let filter_extra = filter.extra.clone();
        let before = filter.before.clone();
        let limit = filter.limit;

        self.blocking(move |conn| {
            // Resolve the cursor to its timestamp first, then filter
            // strictly less on (lineage_id, ts).
            let before_ts: Option<i64> = match &before {
                Some(cursor) => {
                    let id = cursor.checkpoint_id.as_ref().ok_or_else(|| {
                        CheckpointError::Invalid(
                            "before cursor requires a checkpoint_id".to_string(),
                        )
                    })?;
                    conn.query_row(
                        "SELECT ts FROM checkpoints \
                         WHERE lineage_id = ?1 AND checkpoint_id = ?2 \
                         LIMIT 1",
                        params![config.lineage_id, id],
                        |row| row.get(0),
                    )
                    .optional()?
                }
                None => None,
            };

            let mut stmt = conn.prepare(
                "SELECT checkpoint_ns, checkpoint_json, metadata_json, parent_checkpoint_id \
                 FROM checkpoints \
                 WHERE lineage_id = ?1 \
                   AND (?2 = '' OR checkpoint_ns = ?2) \
                   AND (?3 IS NULL OR ts < ?3) \
                 ORDER BY ts DESC, checkpoint_id DESC",
            )?;
            let rows = stmt
                .query_map(
                    params![config.lineage_id, config.namespace, before_ts],
                    row_fields,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut tuples = Vec::new();
            for (ns, checkpoint_json, metadata_json, parent_id) in rows {
                let tuple = Self::row_to_tuple(
                    conn,
                    &config.lineage_id,
                    &ns,
                    &checkpoint_json,
                    &metadata_json,
                    parent_id,
                )?;
                // Metadata equality filters apply to the deserialized extras.
                if !filter_extra
                    .iter()
                    .all(|(k, v)| tuple.metadata.extra.get(k) == Some(v))
                {
                    continue;
                }
                tuples.push(tuple);
                if limit.is_some_and(|l| tuples.len() >= l) {
                    break;
                }
            }
            Ok(tuples)
        })
        .await
    }

    async fn put(&self, req: PutRequest) -> Result<CheckpointConfig> {
        self.blocking(move |conn| {
            let mut checkpoint = req.checkpoint;
            Self::upsert_checkpoint(conn, &req.config, &mut checkpoint, &req.metadata)?;
            Ok(CheckpointConfig {
                lineage_id: req.config.lineage_id,
                namespace: req.config.namespace,
                checkpoint_id: Some(checkpoint.id),
            })
        })
        .await
    }

    async fn put_writes(&self, req: PutWritesRequest) -> Result<()> {
        let checkpoint_id = req
            .config
            .checkpoint_id
            .clone()
            .ok_or_else(|| CheckpointError::Invalid("checkpoint_id is required".to_string()))?;

        self.blocking(move |conn| {
            Self::insert_writes(conn, &req.config, &checkpoint_id, req.writes, false)
        })
        .await
    }

    async fn put_full(&self, req: PutFullRequest) -> Result<CheckpointConfig> {
        self.blocking(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let mut checkpoint = req.checkpoint;
            Self::upsert_checkpoint(&tx, &req.config, &mut checkpoint, &req.metadata)?;
            Self::insert_writes(&tx, &req.config, &checkpoint.id, req.writes, true)?;
            tx.commit()?;
            tracing::debug!(
                lineage = %req.config.lineage_id,
                checkpoint = %checkpoint.id,
                "checkpoint persisted"
            );
            Ok(CheckpointConfig {
                lineage_id: req.config.lineage_id,
                namespace: req.config.namespace,
                checkpoint_id: Some(checkpoint.id),
            })
        })
        .await
    }

    async fn delete_lineage(&self, lineage_id: &str) -> Result<()> {
        let lineage_id = lineage_id.to_string();
        self.blocking(move |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM checkpoint_writes WHERE lineage_id = ?1",
                params![lineage_id],
            )?;
            tx.execute(
                "DELETE FROM checkpoints WHERE lineage_id = ?1",
                params![lineage_id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

type RowFields = (String, Vec<u8>, Vec<u8>, Option<String>);

fn row_fields(row: &rusqlite::Row<'_>) -> rusqlite::Result<RowFields> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}
