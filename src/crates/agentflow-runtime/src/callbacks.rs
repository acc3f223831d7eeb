//! Agent-level lifecycle hooks

use agentflow_core::{AgentError, Invocation, Response};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Hook running before an agent's body; returning a response short-circuits
/// execution (the response is emitted as a single event and the channel
/// closes).
pub type BeforeAgentFn =
    Arc<dyn Fn(&Invocation) -> BoxFuture<'static, Option<Response>> + Send + Sync>;

/// Hook running after an agent's body; may append a synthetic response or
/// replace an error with one.
pub type AfterAgentFn = Arc<
    dyn Fn(&Invocation, Option<&AgentError>) -> BoxFuture<'static, Option<Response>> + Send + Sync,
>;

/// Optional hooks around each invocation
#[derive(Clone, Default)]
pub struct AgentCallbacks {
    pub before_agent: Option<BeforeAgentFn>,
    pub after_agent: Option<AfterAgentFn>,
}

impl AgentCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_before_agent(mut self, hook: BeforeAgentFn) -> Self {
        self.before_agent = Some(hook);
        self
    }

    pub fn with_after_agent(mut self, hook: AfterAgentFn) -> Self {
        self.after_agent = Some(hook);
        self
    }
}

impl std::fmt::Debug for AgentCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCallbacks")
            .field("before_agent", &self.before_agent.is_some())
            .field("after_agent", &self.after_agent.is_some())
            .finish()
    }
}
