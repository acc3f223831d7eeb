//! Pregel channels and the per-execution channel manager
//!
//! A channel is a named pub/sub endpoint coupled to a state field or a
//! fan-out topic. Each tracks a monotonically increasing version, the step it
//! was last updated in, and an `available` flag consumed by the planner.
//!
//! Updates are mutex-guarded; planners read a lock-free snapshot of
//! `(version, available)` taken atomically per step.

use crate::error::{GraphError, Result};
use crate::state::ReducerRef;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Channel behavior variants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    /// Keeps only the most recent write
    LastValue,
    /// Accumulates writes within a step into an array
    Topic,
    /// Holds a value for exactly one step, then clears
    Ephemeral,
    /// Fires once all expected senders have reported
    Barrier {
        /// Sender identities the barrier waits for
        expected: HashSet<String>,
    },
}

/// One write into a channel, tagged with its producing task
#[derive(Debug, Clone)]
pub struct ChannelWrite {
    /// Task (node) that produced the write
    pub sender: String,
    /// Written value
    pub value: Value,
}

/// A single channel's state
#[derive(Debug)]
pub struct Channel {
    pub name: String,
    pub kind: ChannelKind,
    value: Option<Value>,
    reported: HashSet<String>,
    /// Monotonically non-decreasing across steps within a lineage
    pub version: i64,
    pub available: bool,
    pub last_updated_step: i64,
}

impl Channel {
    pub fn new(name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            name: name.into(),
            kind,
            value: None,
            reported: HashSet::new(),
            version: 0,
            available: false,
            last_updated_step: -1,
        }
    }

    /// Current value; topics expose the accumulated array.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Apply one step's writes through `reducer`, bumping the version when
    /// anything changed. Returns whether the channel updated.
    fn update(&mut self, writes: Vec<ChannelWrite>, reducer: &ReducerRef, step: i64) -> Result<bool> {
        if writes.is_empty() {
            return Ok(false);
        }

        match &self.kind {
            ChannelKind::LastValue | ChannelKind::Ephemeral => {
                let mut current = self.value.take().unwrap_or(Value::Null);
                for write in writes {
                    current = reducer.reduce(&current, &write.value)?;
                }
                self.value = Some(current);
                self.available = true;
            }
            ChannelKind::Topic => {
                let mut items = match self.value.take() {
                    Some(Value::Array(arr)) => arr,
                    Some(other) => vec![other],
                    None => Vec::new(),
                };
                items.extend(writes.into_iter().map(|w| w.value));
                self.value = Some(Value::Array(items));
                self.available = true;
            }
            ChannelKind::Barrier { expected } => {
                for write in &writes {
                    if !expected.contains(&write.sender) {
                        return Err(GraphError::Channel(format!(
                            "unexpected barrier sender '{}' on channel '{}'",
                            write.sender, self.name
                        )));
                    }
                }
                self.reported
                    .extend(writes.into_iter().map(|w| w.sender));
                // The reported set is the channel's value, so checkpoints
                // preserve partially-filled barriers.
                let mut reported: Vec<&String> = self.reported.iter().collect();
                reported.sort();
                self.value = Some(Value::Array(
                    reported.into_iter().map(|s| Value::String(s.clone())).collect(),
                ));
                self.available = self.reported.is_superset(expected);
            }
        }

        self.version += 1;
        self.last_updated_step = step;
        Ok(true)
    }

    /// Clear planner-facing availability after consumption. Ephemeral
    /// channels also drop their value; fired barriers reset their senders.
    fn acknowledge(&mut self) {
        match &self.kind {
            ChannelKind::LastValue => self.available = false,
            ChannelKind::Ephemeral => {
                self.available = false;
                self.value = None;
            }
            ChannelKind::Barrier { .. } => {
                if self.available {
                    self.available = false;
                    self.reported.clear();
                    self.value = Some(Value::Array(Vec::new()));
                }
            }
            ChannelKind::Topic => self.available = false,
        }
    }
}

/// Planner-facing view of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub version: i64,
    pub available: bool,
}

/// Mutex-guarded map of channels for one execution
///
/// The lock is never held across user handler calls; handlers receive value
/// clones and the executor applies their writes afterwards.
#[derive(Debug, Default)]
pub struct ChannelManager {
    inner: Mutex<HashMap<String, Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel if absent.
    pub fn ensure(&self, name: &str, kind: ChannelKind) {
        let mut inner = self.inner.lock().expect("channel manager lock poisoned");
        inner
            .entry(name.to_string())
            .or_insert_with(|| Channel::new(name, kind));
    }

    /// Apply one step's writes to `name` through `reducer`.
    pub fn update(
        &self,
        name: &str,
        writes: Vec<ChannelWrite>,
        reducer: &ReducerRef,
        step: i64,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().expect("channel manager lock poisoned");
        let channel = inner
            .get_mut(name)
            .ok_or_else(|| GraphError::Channel(format!("unknown channel '{name}'")))?;
        channel.update(writes, reducer, step)
    }

    /// Atomic snapshot of every channel's `(version, available)`.
    pub fn snapshot(&self) -> HashMap<String, ChannelSnapshot> {
        let inner = self.inner.lock().expect("channel manager lock poisoned");
        inner
            .iter()
            .map(|(name, ch)| {
                (
                    name.clone(),
                    ChannelSnapshot {
                        version: ch.version,
                        available: ch.available,
                    },
                )
            })
            .collect()
    }

    /// Current value of `name`, cloned.
    pub fn value(&self, name: &str) -> Option<Value> {
        let inner = self.inner.lock().expect("channel manager lock poisoned");
        inner.get(name).and_then(|ch| ch.value().cloned())
    }

    /// Values of every channel that currently holds one.
    pub fn values(&self) -> HashMap<String, Value> {
        let inner = self.inner.lock().expect("channel manager lock poisoned");
        inner
            .iter()
            .filter_map(|(name, ch)| ch.value().map(|v| (name.clone(), v.clone())))
            .collect()
    }

    /// Versions of every channel.
    pub fn versions(&self) -> HashMap<String, i64> {
        let inner = self.inner.lock().expect("channel manager lock poisoned");
        inner.iter().map(|(n, ch)| (n.clone(), ch.version)).collect()
    }

    /// Names of currently available channels.
    pub fn available(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("channel manager lock poisoned");
        inner
            .iter()
            .filter(|(_, ch)| ch.available)
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Acknowledge consumption of the named channels after a step.
    pub fn acknowledge(&self, names: &[String]) {
        let mut inner = self.inner.lock().expect("channel manager lock poisoned");
        for name in names {
            if let Some(ch) = inner.get_mut(name) {
                ch.acknowledge();
            }
        }
    }

    /// Restore values, versions, and availability from a checkpoint.
    pub fn restore(
        &self,
        values: &HashMap<String, Value>,
        versions: &HashMap<String, i64>,
        available: &[String],
    ) {
        let mut inner = self.inner.lock().expect("channel manager lock poisoned");
        for (name, ch) in inner.iter_mut() {
            if let Some(v) = values.get(name) {
                ch.value = Some(v.clone());
                if let (ChannelKind::Barrier { .. }, Some(Value::Array(arr))) =
                    (&ch.kind, ch.value.as_ref())
                {
                    ch.reported = arr
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect();
                }
            }
            if let Some(version) = versions.get(name) {
                ch.version = *version;
            }
            ch.available = available.iter().any(|a| a == name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AppendReducer, OverwriteReducer};
    use serde_json::json;
    use std::sync::Arc;

    fn overwrite() -> ReducerRef {
        Arc::new(OverwriteReducer)
    }

    fn write(sender: &str, value: Value) -> ChannelWrite {
        ChannelWrite {
            sender: sender.to_string(),
            value,
        }
    }

    #[test]
    fn test_last_value_keeps_most_recent() {
        let mut ch = Channel::new("status", ChannelKind::LastValue);
        ch.update(
            vec![write("a", json!("first")), write("b", json!("second"))],
            &overwrite(),
            0,
        )
        .unwrap();
        assert_eq!(ch.value(), Some(&json!("second")));
        assert_eq!(ch.version, 1);
        assert!(ch.available);
    }

    #[test]
    fn test_topic_accumulates_within_step() {
        let mut ch = Channel::new("events", ChannelKind::Topic);
        ch.update(vec![write("a", json!(1))], &overwrite(), 0).unwrap();
        ch.update(vec![write("b", json!(2)), write("c", json!(3))], &overwrite(), 1)
            .unwrap();
        assert_eq!(ch.value(), Some(&json!([1, 2, 3])));
        assert_eq!(ch.version, 2);
    }

    #[test]
    fn test_ephemeral_clears_on_acknowledge() {
        let mut ch = Channel::new("tick", ChannelKind::Ephemeral);
        ch.update(vec![write("a", json!(true))], &overwrite(), 0).unwrap();
        assert!(ch.available);
        ch.acknowledge();
        assert!(!ch.available);
        assert!(ch.value().is_none());
        // Version survives acknowledgement.
        assert_eq!(ch.version, 1);
    }

    #[test]
    fn test_barrier_waits_for_all_senders() {
        let expected: HashSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let mut ch = Channel::new("join", ChannelKind::Barrier { expected });

        ch.update(vec![write("a", json!(null))], &overwrite(), 0).unwrap();
        assert!(!ch.available);
        ch.update(vec![write("b", json!(null))], &overwrite(), 1).unwrap();
        assert!(ch.available);

        ch.acknowledge();
        assert!(!ch.available);
        // The barrier re-arms after firing.
        ch.update(vec![write("a", json!(null))], &overwrite(), 2).unwrap();
        assert!(!ch.available);
    }

    #[test]
    fn test_barrier_rejects_unknown_sender() {
        let expected: HashSet<String> = ["a"].iter().map(|s| s.to_string()).collect();
        let mut ch = Channel::new("join", ChannelKind::Barrier { expected });
        assert!(ch
            .update(vec![write("stranger", json!(null))], &overwrite(), 0)
            .is_err());
    }

    #[test]
    fn test_versions_non_decreasing() {
        let mut ch = Channel::new("c", ChannelKind::LastValue);
        let mut last = ch.version;
        for step in 0..5 {
            ch.update(vec![write("a", json!(step))], &overwrite(), step).unwrap();
            assert!(ch.version > last);
            last = ch.version;
            ch.acknowledge();
        }
    }

    #[test]
    fn test_manager_snapshot_and_reducer() {
        let mgr = ChannelManager::new();
        mgr.ensure("messages", ChannelKind::LastValue);
        let append: ReducerRef = Arc::new(AppendReducer);
        mgr.update(
            "messages",
            vec![write("a", json!(["x"])), write("b", json!(["y"]))],
            &append,
            0,
        )
        .unwrap();

        assert_eq!(mgr.value("messages"), Some(json!(["x", "y"])));
        let snap = mgr.snapshot();
        assert_eq!(snap["messages"].version, 1);
        assert!(snap["messages"].available);

        mgr.acknowledge(&["messages".to_string()]);
        assert!(!mgr.snapshot()["messages"].available);
    }

    #[test]
    fn test_manager_restore() {
        let mgr = ChannelManager::new();
        mgr.ensure("a", ChannelKind::LastValue);
        mgr.ensure("b", ChannelKind::Ephemeral);

        let values = HashMap::from([("a".to_string(), json!(42))]);
        let versions = HashMap::from([("a".to_string(), 7), ("b".to_string(), 3)]);
        mgr.restore(&values, &versions, &["a".to_string()]);

        assert_eq!(mgr.value("a"), Some(json!(42)));
        let snap = mgr.snapshot();
        assert_eq!(snap["a"].version, 7);
        assert!(snap["a"].available);
        assert_eq!(snap["b"].version, 3);
        assert!(!snap["b"].available);
    }
}
