//! Pregel-style step executor
//!
//! Runs a compiled [`Graph`] until quiescence, a step limit, or an
//! interrupt. Each step: plan eligible nodes from channel versions, execute
//! them concurrently, apply their writes through the schema's reducers,
//! checkpoint atomically when a store is attached, then acknowledge consumed
//! channels.
//!
//! A node is eligible when all its subscribed channels are available and
//! each channel's version is strictly greater than the version the node last
//! observed. Node handlers never see channel locks; they receive a cloned
//! state snapshot and return a write set.

use crate::cache::{NodeCache, CACHE_HIT_MARKER};
use crate::channel::{ChannelKind, ChannelManager, ChannelWrite};
use crate::command::{Command, NodeResult};
use crate::error::{GraphError, Result};
use crate::graph::{Graph, Node, NodeCallbacks, END};
use agentflow_checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSource, CheckpointStore,
    PendingWrite, PutFullRequest,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Default bound on steps per run
pub const DEFAULT_MAX_STEPS: usize = 25;

/// Reserved channel-values key recording planner availability in checkpoints
const AVAILABLE_KEY: &str = "__available__";

/// Prefix of internal node trigger channels
const TRIGGER_PREFIX: &str = "trigger:";

fn trigger_name(node_id: &str) -> String {
    format!("{TRIGGER_PREFIX}{node_id}")
}

fn is_internal_channel(name: &str) -> bool {
    name.starts_with(TRIGGER_PREFIX) || name == AVAILABLE_KEY
}

/// Executor configuration
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Stop after this many steps
    pub max_steps: usize,
    /// Lineage for checkpoints
    pub lineage_id: String,
    /// Namespace for checkpoints
    pub namespace: String,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            lineage_id: format!("lineage-{}", uuid::Uuid::new_v4()),
            namespace: String::new(),
        }
    }
}

/// Node lifecycle phase surfaced as events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    Start,
    Complete,
    Error,
}

/// Node lifecycle notification
#[derive(Debug, Clone)]
pub struct NodeEvent {
    pub node_id: String,
    pub phase: NodePhase,
    /// Writes produced by the node (complete phase); includes the
    /// `_cache_hit` marker when served from cache
    pub state_delta: HashMap<String, Value>,
    pub error: Option<String>,
    pub step: i64,
}

/// Sender half for node lifecycle events
pub type NodeEventSender = mpsc::Sender<NodeEvent>;

/// One line of execution history
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub step: i64,
    pub node: String,
    pub error: Option<String>,
}

/// How a run ended
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// No more eligible nodes
    Complete(HashMap<String, Value>),
    /// A node returned `Command::Interrupt`; resume from the latest
    /// checkpoint
    Interrupted {
        node: String,
        reason: String,
        state: HashMap<String, Value>,
    },
    /// A node returned `Command::Halt`
    Halted(HashMap<String, Value>),
    /// The step bound was reached
    MaxStepsReached(HashMap<String, Value>),
}

impl ExecutionOutcome {
    /// The final state regardless of how the run ended.
    pub fn state(&self) -> &HashMap<String, Value> {
        match self {
            Self::Complete(s) | Self::Halted(s) | Self::MaxStepsReached(s) => s,
            Self::Interrupted { state, .. } => state,
        }
    }
}

struct RunState {
    channels: ChannelManager,
    state: HashMap<String, Value>,
    versions_seen: HashMap<String, HashMap<String, i64>>,
    step: i64,
    last_checkpoint_id: Option<String>,
    history: Vec<ExecutionRecord>,
}

/// Channel-driven step executor over a compiled graph
pub struct Executor {
    graph: Arc<Graph>,
    store: Option<Arc<dyn CheckpointStore>>,
    cache: Arc<NodeCache>,
    global_callbacks: Option<NodeCallbacks>,
    events: Option<NodeEventSender>,
    options: ExecutorOptions,
}

impl Executor {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self {
            graph,
            store: None,
            cache: Arc::new(NodeCache::new()),
            global_callbacks: None,
            events: None,
            options: ExecutorOptions::default(),
        }
    }

    /// Attach a checkpoint store; every step is persisted via `put_full`.
    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Share a node cache across runs.
    pub fn with_cache(mut self, cache: Arc<NodeCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Hooks applied to every node in addition to per-node hooks.
    pub fn with_global_callbacks(mut self, callbacks: NodeCallbacks) -> Self {
        self.global_callbacks = Some(callbacks);
        self
    }

    /// Receive node lifecycle events.
    pub fn with_events(mut self, events: NodeEventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    /// Run from an initial state until quiescence, limit, or interrupt.
    pub async fn run(
        &self,
        ctx: CancellationToken,
        initial_state: HashMap<String, Value>,
    ) -> Result<ExecutionOutcome> {
        let mut run = self.fresh_run_state();

        // Seed state-field channels and the entry triggers, then persist the
        // input checkpoint so step -1 is a valid resumption point.
        let input_writes: Vec<(String, NodeResult)> = vec![(
            "__input__".to_string(),
            NodeResult {
                writes: initial_state,
                command: None,
            },
        )];
        self.apply_writes(&mut run, &input_writes, 0)?;
        for entry in self.graph.entry_nodes() {
            self.fire_trigger(&run, entry, "__start__", 0)?;
        }
        self.refresh_state(&mut run);
        self.checkpoint(&mut run, CheckpointSource::Input, -1, Vec::new())
            .await?;

        self.step_loop(ctx, run).await
    }

    /// Resume from the latest checkpoint of `(lineage, namespace)`; an empty
    /// namespace searches across namespaces.
    pub async fn resume(&self, ctx: CancellationToken) -> Result<ExecutionOutcome> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| GraphError::Execution("resume requires a checkpoint store".to_string()))?
            .clone();

        let config = CheckpointConfig::new(self.options.lineage_id.clone())
            .with_namespace(self.options.namespace.clone());
        let tuple = store
            .get_tuple(&config)
            .await?
            .ok_or_else(|| {
                GraphError::Execution(format!(
                    "no checkpoint found for lineage '{}'",
                    self.options.lineage_id
                ))
            })?;

        let mut run = self.fresh_run_state();

        let available: Vec<String> = tuple
            .checkpoint
            .channel_values
            .get(AVAILABLE_KEY)
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let values: HashMap<String, Value> = tuple
            .checkpoint
            .channel_values
            .iter()
            .filter(|(k, _)| k.as_str() != AVAILABLE_KEY)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        // Channels created dynamically during the original run must exist
        // before restore touches them.
        for name in tuple.checkpoint.channel_versions.keys() {
            let kind = if name.starts_with(TRIGGER_PREFIX) {
                ChannelKind::Ephemeral
            } else {
                ChannelKind::LastValue
            };
            run.channels.ensure(name, kind);
        }
        run.channels
            .restore(&values, &tuple.checkpoint.channel_versions, &available);
        run.versions_seen = tuple.checkpoint.versions_seen.clone();
        run.step = tuple.metadata.step + 1;
        run.last_checkpoint_id = Some(tuple.checkpoint.id.clone());
        self.refresh_state(&mut run);

        tracing::debug!(
            lineage = %self.options.lineage_id,
            checkpoint = %tuple.checkpoint.id,
            step = run.step,
            "resuming from checkpoint"
        );

        self.step_loop(ctx, run).await
    }

    fn fresh_run_state(&self) -> RunState {
        let channels = ChannelManager::new();
        for field in self.graph.schema().field_names() {
            channels.ensure(field, ChannelKind::LastValue);
        }
        for id in self.graph.node_ids() {
            let kind = match self.graph.barrier(id) {
                Some(expected) => ChannelKind::Barrier {
                    expected: expected.clone(),
                },
                None => ChannelKind::Ephemeral,
            };
            channels.ensure(&trigger_name(id), kind);
        }
        RunState {
            channels,
            state: HashMap::new(),
            versions_seen: HashMap::new(),
            step: 0,
            last_checkpoint_id: None,
            history: Vec::new(),
        }
    }

    async fn step_loop(
        &self,
        ctx: CancellationToken,
        mut run: RunState,
    ) -> Result<ExecutionOutcome> {
        loop {
            if ctx.is_cancelled() {
                return Err(GraphError::Cancelled);
            }
            if run.step >= self.options.max_steps as i64 {
                return Ok(ExecutionOutcome::MaxStepsReached(self.public_state(&run)));
            }

            let planned = self.plan(&run);
            if planned.is_empty() {
                return Ok(ExecutionOutcome::Complete(self.public_state(&run)));
            }

            let step = run.step;
            tracing::debug!(step, nodes = ?planned, "executing step");

            // Record observed versions at task creation time.
            let snapshot = run.channels.snapshot();
            for node_id in &planned {
                let trig = trigger_name(node_id);
                if let Some(snap) = snapshot.get(&trig) {
                    run.versions_seen
                        .entry(node_id.clone())
                        .or_default()
                        .insert(trig, snap.version);
                }
            }

            let results = match self.execute_nodes(&ctx, &run, &planned, step).await {
                Ok(results) => results,
                Err((node, _)) if node == "__cancelled__" => {
                    return Err(GraphError::Cancelled);
                }
                Err((node, error)) => {
                    run.history.push(ExecutionRecord {
                        step,
                        node: node.clone(),
                        error: Some(error.clone()),
                    });
                    // Preserve the pre-step snapshot for resumption.
                    self.checkpoint_on_error(&mut run, step, &node, &error).await;
                    return Err(GraphError::node_execution(node, error));
                }
            };

            for (node_id, _) in &results {
                run.history.push(ExecutionRecord {
                    step,
                    node: node_id.clone(),
                    error: None,
                });
            }

            let consumed: Vec<String> = planned.iter().map(|n| trigger_name(n)).collect();

            self.apply_writes(&mut run, &results, step)?;
            // Conditional predicates observe the post-apply state.
            self.refresh_state(&mut run);
            let routed = self.route(&mut run, &results, step).await?;

            let pending: Vec<PendingWrite> = results
                .iter()
                .flat_map(|(node_id, result)| {
                    result.writes.iter().map(move |(channel, value)| PendingWrite {
                        task_id: node_id.clone(),
                        channel: channel.clone(),
                        value: value.clone(),
                        sequence: 0,
                        task_path: String::new(),
                    })
                })
                .collect();
            self.checkpoint(&mut run, CheckpointSource::Loop, step, pending)
                .await?;

            // Clear availability of consumed triggers unless this step's
            // routing re-armed them (self-loops).
            let to_ack: Vec<String> = consumed
                .into_iter()
                .filter(|name| !routed.contains(name))
                .collect();
            run.channels.acknowledge(&to_ack);

            for (node_id, result) in &results {
                match &result.command {
                    Some(Command::Interrupt(reason)) => {
                        return Ok(ExecutionOutcome::Interrupted {
                            node: node_id.clone(),
                            reason: reason.clone(),
                            state: self.public_state(&run),
                        });
                    }
                    Some(Command::Halt) => {
                        return Ok(ExecutionOutcome::Halted(self.public_state(&run)));
                    }
                    _ => {}
                }
            }

            run.step += 1;
        }
    }

    /// Eligible nodes: every subscribed channel available with a version
    /// strictly greater than last observed.
    fn plan(&self, run: &RunState) -> Vec<String> {
        let snapshot = run.channels.snapshot();
        let mut planned: Vec<String> = self
            .graph
            .node_ids()
            .into_iter()
            .filter(|node_id| {
                let trig = trigger_name(node_id);
                let Some(snap) = snapshot.get(&trig) else {
                    return false;
                };
                let seen = run
                    .versions_seen
                    .get(*node_id)
                    .and_then(|m| m.get(&trig))
                    .copied()
                    .unwrap_or(0);
                snap.available && snap.version > seen
            })
            .map(str::to_string)
            .collect();
        planned.sort();
        planned
    }

    /// Run all planned nodes concurrently. The first handler error aborts
    /// the step.
    async fn execute_nodes(
        &self,
        ctx: &CancellationToken,
        run: &RunState,
        planned: &[String],
        step: i64,
    ) -> std::result::Result<Vec<(String, NodeResult)>, (String, String)> {
        let mut join_set: JoinSet<std::result::Result<(String, NodeResult), (String, String)>> =
            JoinSet::new();

        for node_id in planned {
            let node = self
                .graph
                .node(node_id)
                .cloned()
                .expect("planned node exists");
            let state = run.state.clone();
            let cache = self.cache.clone();
            let events = self.events.clone();
            let global = self.global_callbacks.clone();
            let ctx = ctx.clone();

            join_set.spawn(async move {
                tokio::select! {
                    result = Self::run_node(node, state, cache, events, global, step) => result,
                    _ = ctx.cancelled() => Err(("__cancelled__".to_string(), "cancelled".to_string())),
                }
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(item)) => results.push(item),
                Ok(Err((node, error))) => {
                    join_set.abort_all();
                    return Err((node, error));
                }
                Err(join_err) => {
                    join_set.abort_all();
                    return Err(("__join__".to_string(), join_err.to_string()));
                }
            }
        }
        // Keep apply order deterministic regardless of completion order.
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }

    async fn run_node(
        node: Node,
        state: HashMap<String, Value>,
        cache: Arc<NodeCache>,
        events: Option<NodeEventSender>,
        global_callbacks: Option<NodeCallbacks>,
        step: i64,
    ) -> std::result::Result<(String, NodeResult), (String, String)> {
        let node_id = node.id.clone();
        emit(
            &events,
            NodeEvent {
                node_id: node_id.clone(),
                phase: NodePhase::Start,
                state_delta: HashMap::new(),
                error: None,
                step,
            },
        )
        .await;

        // before hooks may short-circuit the handler.
        let mut short_circuit = None;
        for callbacks in [&global_callbacks, &node.callbacks] {
            if let Some(before) = callbacks.as_ref().and_then(|c| c.before.as_ref()) {
                if let Some(result) = before(&node_id, &state).await {
                    short_circuit = Some(result);
                    break;
                }
            }
        }

        let (result, cache_hit) = match short_circuit {
            Some(result) => (result, false),
            None => {
                let cache_key = node
                    .cache_policy
                    .as_ref()
                    .map(|policy| policy.key(&node_id, &state));
                let cached = cache_key.as_ref().and_then(|key| cache.get(key));

                match cached {
                    Some(writes) => {
                        tracing::debug!(node = %node_id, "cache hit, skipping handler");
                        (
                            NodeResult {
                                writes,
                                command: None,
                            },
                            true,
                        )
                    }
                    None => {
                        let result = match (node.handler)(state).await {
                            Ok(result) => result,
                            Err(e) => {
                                let message = e.to_string();
                                for callbacks in [&global_callbacks, &node.callbacks] {
                                    if let Some(on_error) =
                                        callbacks.as_ref().and_then(|c| c.on_error.as_ref())
                                    {
                                        on_error(&node_id, &e);
                                    }
                                }
                                emit(
                                    &events,
                                    NodeEvent {
                                        node_id: node_id.clone(),
                                        phase: NodePhase::Error,
                                        state_delta: HashMap::new(),
                                        error: Some(message.clone()),
                                        step,
                                    },
                                )
                                .await;
                                return Err((node_id, message));
                            }
                        };
                        if let (Some(key), Some(policy)) = (cache_key, &node.cache_policy) {
                            cache.put(key, result.writes.clone(), policy.ttl);
                        }
                        (result, false)
                    }
                }
            }
        };

        // after hooks may rewrite the result.
        let mut result = result;
        for callbacks in [&global_callbacks, &node.callbacks] {
            if let Some(after) = callbacks.as_ref().and_then(|c| c.after.as_ref()) {
                result = after(&node_id, result).await;
            }
        }

        let mut delta = result.writes.clone();
        if cache_hit {
            delta.insert(CACHE_HIT_MARKER.to_string(), Value::Bool(true));
        }
        emit(
            &events,
            NodeEvent {
                node_id: node_id.clone(),
                phase: NodePhase::Complete,
                state_delta: delta,
                error: None,
                step,
            },
        )
        .await;

        Ok((node_id, result))
    }

    /// Combine the step's writes per channel through the schema reducers.
    fn apply_writes(
        &self,
        run: &mut RunState,
        results: &[(String, NodeResult)],
        step: i64,
    ) -> Result<()> {
        let mut per_channel: HashMap<&str, Vec<ChannelWrite>> = HashMap::new();
        for (node_id, result) in results {
            for (channel, value) in &result.writes {
                per_channel.entry(channel.as_str()).or_default().push(ChannelWrite {
                    sender: node_id.clone(),
                    value: value.clone(),
                });
            }
        }
        for (channel, writes) in per_channel {
            run.channels.ensure(channel, ChannelKind::LastValue);
            let reducer = self.graph.schema().reducer_for(channel).clone();
            run.channels.update(channel, writes, &reducer, step)?;
        }
        Ok(())
    }

    /// Resolve routing for each executed node and fire trigger channels.
    /// Returns the set of trigger channels written.
    async fn route(
        &self,
        run: &mut RunState,
        results: &[(String, NodeResult)],
        step: i64,
    ) -> Result<Vec<String>> {
        let mut routed = Vec::new();
        for (node_id, result) in results {
            let targets: Vec<String> = match &result.command {
                Some(Command::Goto(target)) => vec![target.clone()],
                Some(Command::Halt) => Vec::new(),
                // An interrupted node still arms its successors; they fire
                // on resume from the checkpoint.
                Some(Command::Interrupt(_)) | None => {
                    if let Some(edge) = self.graph.conditional_edges.get(node_id) {
                        let target = (edge.predicate)(run.state.clone()).await?;
                        vec![target]
                    } else {
                        self.graph
                            .edges
                            .get(node_id)
                            .cloned()
                            .unwrap_or_default()
                    }
                }
            };

            for target in targets {
                if target == END {
                    continue;
                }
                if self.graph.node(&target).is_none() {
                    return Err(GraphError::Execution(format!(
                        "route target '{target}' does not exist"
                    )));
                }
                self.fire_trigger(run, &target, node_id, step)?;
                routed.push(trigger_name(&target));
            }
        }
        Ok(routed)
    }

    fn fire_trigger(&self, run: &RunState, target: &str, sender: &str, step: i64) -> Result<()> {
        let name = trigger_name(target);
        run.channels.ensure(&name, ChannelKind::Ephemeral);
        let reducer = self.graph.schema().reducer_for(&name).clone();
        run.channels.update(
            &name,
            vec![ChannelWrite {
                sender: sender.to_string(),
                value: Value::Bool(true),
            }],
            &reducer,
            step,
        )?;
        Ok(())
    }

    /// Pull state-field values out of the channel manager.
    fn refresh_state(&self, run: &mut RunState) {
        run.state = run
            .channels
            .values()
            .into_iter()
            .filter(|(name, _)| !is_internal_channel(name))
            .collect();
    }

    fn public_state(&self, run: &RunState) -> HashMap<String, Value> {
        run.state.clone()
    }

    async fn checkpoint(
        &self,
        run: &mut RunState,
        source: CheckpointSource,
        step: i64,
        writes: Vec<PendingWrite>,
    ) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let mut channel_values = run.channels.values();
        channel_values.insert(
            AVAILABLE_KEY.to_string(),
            Value::Array(
                run.channels
                    .available()
                    .into_iter()
                    .map(Value::String)
                    .collect(),
            ),
        );

        let mut checkpoint = Checkpoint::new(
            channel_values,
            run.channels.versions(),
            run.versions_seen.clone(),
        );
        if let Some(parent) = &run.last_checkpoint_id {
            checkpoint = checkpoint.with_parent(parent.clone());
        }
        let checkpoint_id = checkpoint.id.clone();

        let config = store
            .put_full(PutFullRequest {
                config: CheckpointConfig::new(self.options.lineage_id.clone())
                    .with_namespace(self.options.namespace.clone()),
                checkpoint,
                metadata: CheckpointMetadata::new(source, step),
                new_versions: run.channels.versions(),
                writes,
            })
            .await?;

        run.last_checkpoint_id = config.checkpoint_id.or(Some(checkpoint_id));
        Ok(())
    }

    /// Best effort; the prior checkpoint already holds the last good state,
    /// this one records the failure in lineage history.
    async fn checkpoint_on_error(&self, run: &mut RunState, step: i64, node: &str, error: &str) {
        if self.store.is_some() {
            let writes = vec![PendingWrite {
                task_id: node.to_string(),
                channel: "__error__".to_string(),
                value: Value::String(error.to_string()),
                sequence: 0,
                task_path: String::new(),
            }];
            if let Err(e) = self.checkpoint(run, CheckpointSource::Loop, step, writes).await {
                tracing::warn!(error = %e, "failed to persist error checkpoint");
            }
        }
        tracing::error!(node, step, error, "node execution failed");
    }
}

async fn emit(events: &Option<NodeEventSender>, event: NodeEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}
