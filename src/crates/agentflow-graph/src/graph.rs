//! Graph construction: nodes, edges, and the builder
//!
//! The graph is explicitly cyclic; ownership is an arena of nodes keyed by
//! string id. Edges and commands reference nodes by id, never by pointer.

use crate::cache::CachePolicy;
use crate::command::NodeResult;
use crate::error::{GraphError, Result};
use crate::state::StateSchema;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Pseudo-node marking the graph entry
pub const START: &str = "__start__";

/// Pseudo-node marking graph completion
pub const END: &str = "__end__";

/// Async node handler: state snapshot in, write set + command out
pub type NodeHandler =
    Arc<dyn Fn(HashMap<String, Value>) -> BoxFuture<'static, Result<NodeResult>> + Send + Sync>;

/// Async conditional-edge predicate: state snapshot in, target node id out
pub type EdgePredicate =
    Arc<dyn Fn(HashMap<String, Value>) -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// What kind of work a node performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Plain async function
    Function,
    /// Wraps a model call
    Llm,
    /// Wraps a tool invocation
    Tool,
    /// Wraps a nested agent
    SubAgent,
}

/// Per-node lifecycle hooks
///
/// `before` may return a synthetic result that skips the handler; `after`
/// may rewrite the result; `on_error` is observational and does not suppress
/// the error.
#[derive(Clone, Default)]
pub struct NodeCallbacks {
    pub before: Option<
        Arc<
            dyn Fn(&str, &HashMap<String, Value>) -> BoxFuture<'static, Option<NodeResult>>
                + Send
                + Sync,
        >,
    >,
    pub after:
        Option<Arc<dyn Fn(&str, NodeResult) -> BoxFuture<'static, NodeResult> + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(&str, &GraphError) + Send + Sync>>,
}

impl std::fmt::Debug for NodeCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCallbacks")
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// One node in the arena
#[derive(Clone)]
pub struct Node {
    /// Unique id within the graph
    pub id: String,
    /// Human-readable name (defaults to the id)
    pub name: String,
    /// Node type
    pub kind: NodeKind,
    /// The handler invoked when the node fires
    pub handler: NodeHandler,
    /// Optional lifecycle hooks
    pub callbacks: Option<NodeCallbacks>,
    /// Optional result caching
    pub cache_policy: Option<CachePolicy>,
    /// Free-form metadata
    pub metadata: HashMap<String, Value>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("cached", &self.cache_policy.is_some())
            .finish()
    }
}

/// Conditional edge: predicate selects one of the declared targets
#[derive(Clone)]
pub struct ConditionalEdge {
    pub predicate: EdgePredicate,
    pub targets: Vec<String>,
}

/// A compiled, immutable graph
pub struct Graph {
    pub(crate) nodes: HashMap<String, Node>,
    /// Static edges: from -> targets
    pub(crate) edges: HashMap<String, Vec<String>>,
    /// Conditional edges: from -> predicate
    pub(crate) conditional_edges: HashMap<String, ConditionalEdge>,
    /// Fan-in joins: target -> expected sender set
    pub(crate) barriers: HashMap<String, std::collections::HashSet<String>>,
    pub(crate) schema: StateSchema,
}

impl Graph {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.keys().map(String::as_str).collect()
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    /// Nodes reached directly from START.
    pub fn entry_nodes(&self) -> &[String] {
        self.edges.get(START).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The expected sender set of a fan-in target, when one is declared.
    pub fn barrier(&self, target: &str) -> Option<&std::collections::HashSet<String>> {
        self.barriers.get(target)
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.edges)
            .finish()
    }
}

/// Builder for [`Graph`]
pub struct GraphBuilder {
    nodes: HashMap<String, Node>,
    edges: HashMap<String, Vec<String>>,
    conditional_edges: HashMap<String, ConditionalEdge>,
    barriers: HashMap<String, std::collections::HashSet<String>>,
    schema: StateSchema,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            conditional_edges: HashMap::new(),
            barriers: HashMap::new(),
            schema: StateSchema::new(),
        }
    }

    pub fn with_schema(mut self, schema: StateSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Add a function node with the given handler.
    pub fn add_node<F, Fut>(self, id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(HashMap<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<NodeResult>> + Send + 'static,
    {
        self.add_node_full(id, NodeKind::Function, handler, None, None)
    }

    /// Add a node with full configuration.
    pub fn add_node_full<F, Fut>(
        mut self,
        id: impl Into<String>,
        kind: NodeKind,
        handler: F,
        cache_policy: Option<CachePolicy>,
        callbacks: Option<NodeCallbacks>,
    ) -> Self
    where
        F: Fn(HashMap<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<NodeResult>> + Send + 'static,
    {
        let id = id.into();
        self.nodes.insert(
            id.clone(),
            Node {
                name: id.clone(),
                id,
                kind,
                handler: Arc::new(move |state| Box::pin(handler(state))),
                callbacks,
                cache_policy,
                metadata: HashMap::new(),
            },
        );
        self
    }

    /// Add a static edge.
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.entry(from.into()).or_default().push(to.into());
        self
    }

    /// Add a conditional edge whose predicate picks one of `targets`.
    pub fn add_conditional_edge<F, Fut>(
        mut self,
        from: impl Into<String>,
        predicate: F,
        targets: impl IntoIterator<Item = String>,
    ) -> Self
    where
        F: Fn(HashMap<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String>> + Send + 'static,
    {
        self.conditional_edges.insert(
            from.into(),
            ConditionalEdge {
                predicate: Arc::new(move |state| Box::pin(predicate(state))),
                targets: targets.into_iter().collect(),
            },
        );
        self
    }

    /// Shorthand for `add_edge(START, id)`.
    pub fn set_entry_point(self, id: impl Into<String>) -> Self {
        self.add_edge(START, id)
    }

    /// Declare `target` as a fan-in join: it fires only once every source
    /// has routed to it within the run (a barrier channel gates planning).
    /// Also adds the edges `source -> target`.
    pub fn add_fan_in(
        mut self,
        sources: impl IntoIterator<Item = String>,
        target: impl Into<String>,
    ) -> Self {
        let target = target.into();
        let sources: Vec<String> = sources.into_iter().collect();
        self.barriers
            .entry(target.clone())
            .or_default()
            .extend(sources.iter().cloned());
        for source in sources {
            self = self.add_edge(source, target.clone());
        }
        self
    }

    /// Validate and compile. Cycles are permitted; dangling references are
    /// not.
    pub fn compile(self) -> Result<Graph> {
        let node_exists =
            |id: &str| id == START || id == END || self.nodes.contains_key(id);

        if self.edges.get(START).map_or(true, Vec::is_empty) {
            return Err(GraphError::Validation(
                "graph has no entry point (add an edge from __start__)".to_string(),
            ));
        }

        for (from, targets) in &self.edges {
            if !node_exists(from) {
                return Err(GraphError::Validation(format!(
                    "edge source '{from}' does not exist"
                )));
            }
            for to in targets {
                if !node_exists(to) {
                    return Err(GraphError::Validation(format!(
                        "edge target '{to}' does not exist"
                    )));
                }
            }
        }
        for (from, edge) in &self.conditional_edges {
            if !node_exists(from) {
                return Err(GraphError::Validation(format!(
                    "conditional edge source '{from}' does not exist"
                )));
            }
            for to in &edge.targets {
                if !node_exists(to) {
                    return Err(GraphError::Validation(format!(
                        "conditional edge target '{to}' does not exist"
                    )));
                }
            }
        }
        for (target, sources) in &self.barriers {
            if !self.nodes.contains_key(target) {
                return Err(GraphError::Validation(format!(
                    "fan-in target '{target}' does not exist"
                )));
            }
            for source in sources {
                if !self.nodes.contains_key(source) {
                    return Err(GraphError::Validation(format!(
                        "fan-in source '{source}' does not exist"
                    )));
                }
            }
        }

        Ok(Graph {
            nodes: self.nodes,
            edges: self.edges,
            conditional_edges: self.conditional_edges,
            barriers: self.barriers,
            schema: self.schema,
        })
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}
