//! # agentflow-graph - Channel-Driven Graph Execution
//!
//! A Pregel-style step executor for directed (and explicitly cyclic) graphs
//! of async nodes, with per-step checkpointing, per-node result caching, and
//! lifecycle callbacks.
//!
//! ## Execution Model
//!
//! Execution proceeds in coordinated steps:
//!
//! 1. **Plan** - a node is eligible when all its subscribed channels are
//!    `available` and each channel's version is strictly greater than the
//!    version the node last observed; barrier channels require their full
//!    sender set.
//! 2. **Execute** - eligible nodes run concurrently against a cloned state
//!    snapshot and return write sets plus optional commands (`goto`,
//!    `interrupt`, `halt`).
//! 3. **Apply** - per channel, writes combine through the state schema's
//!    reducer; versions bump; availability marks.
//! 4. **Checkpoint** - when a store is attached, the post-step state and all
//!    writes persist atomically via `put_full`.
//! 5. **Acknowledge** - consumed LastValue/Ephemeral channels clear, then
//!    the loop repeats until quiescence, `max_steps`, or an interrupt.
//!
//! ## Modules
//!
//! - [`graph`] - arena-of-nodes [`Graph`] and [`GraphBuilder`]
//! - [`channel`] - [`ChannelManager`] with LastValue / Topic / Ephemeral /
//!   Barrier variants
//! - [`state`] - [`StateSchema`] and built-in reducers
//! - [`executor`] - the step [`Executor`], interrupts, and resume
//! - [`cache`] - [`CachePolicy`] / [`NodeCache`] keyed on canonical JSON
//!   projections
//! - [`command`] - [`NodeResult`] write sets and [`Command`]s

pub mod cache;
pub mod channel;
pub mod command;
pub mod error;
pub mod executor;
pub mod graph;
pub mod state;

pub use cache::{CachePolicy, NodeCache, CACHE_HIT_MARKER};
pub use channel::{Channel, ChannelKind, ChannelManager, ChannelSnapshot, ChannelWrite};
pub use command::{Command, NodeResult};
pub use error::{GraphError, Result};
pub use executor::{
    ExecutionOutcome, ExecutionRecord, Executor, ExecutorOptions, NodeEvent, NodeEventSender,
    NodePhase, DEFAULT_MAX_STEPS,
};
pub use graph::{
    EdgePredicate, Graph, GraphBuilder, Node, NodeCallbacks, NodeHandler, NodeKind, END, START,
};
pub use state::{
    AppendReducer, FieldSpec, MergeReducer, OverwriteReducer, Reducer, ReducerRef, StateSchema,
    SumReducer,
};
