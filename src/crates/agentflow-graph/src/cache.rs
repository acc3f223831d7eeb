//! Per-node result caching
//!
//! A node with a [`CachePolicy`] has its write set memoized. The cache key
//! hashes the canonical JSON of the node's input-state projection: the fields
//! named by the policy (or the whole state when none are named), serialized
//! in sorted key order so logically equal states hash equally.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Marker key added to the state delta of a cache-served node completion
pub const CACHE_HIT_MARKER: &str = "_cache_hit";

/// Caching configuration for one node
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// State fields participating in the key; empty means the whole state
    pub key_fields: Vec<String>,
    /// How long a cached write set stays valid
    pub ttl: Duration,
}

impl CachePolicy {
    pub fn new(ttl: Duration) -> Self {
        Self {
            key_fields: Vec::new(),
            ttl,
        }
    }

    pub fn with_key_fields(mut self, fields: impl IntoIterator<Item = String>) -> Self {
        self.key_fields = fields.into_iter().collect();
        self
    }

    /// Cache key for `state` under this policy, scoped by node id.
    pub fn key(&self, node_id: &str, state: &HashMap<String, Value>) -> String {
        let projection: BTreeMap<&str, &Value> = state
            .iter()
            .filter(|(k, _)| self.key_fields.is_empty() || self.key_fields.iter().any(|f| f == *k))
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        let canonical =
            serde_json::to_string(&projection).unwrap_or_else(|_| String::from("{}"));

        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        canonical.hash(&mut hasher);
        format!("{node_id}:{:x}", hasher.finish())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    writes: HashMap<String, Value>,
    expires_at: Instant,
}

/// In-memory node result cache with TTL expiry
#[derive(Debug, Default)]
pub struct NodeCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached write set for `key`, unless expired.
    pub fn get(&self, key: &str) -> Option<HashMap<String, Value>> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.writes.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a write set under `key` for `ttl`.
    pub fn put(&self, key: String, writes: HashMap<String, Value>, ttl: Duration) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.insert(
            key,
            CacheEntry {
                writes,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
