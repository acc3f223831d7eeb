//! Invocation: one run of an agent against one user message

use crate::agent::AgentRef;
use crate::model::{Message, ModelRef};
use crate::session::SessionRef;
use uuid::Uuid;

/// Per-invocation options
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Capacity of the invocation's event channel
    pub channel_buffer_size: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            channel_buffer_size: crate::agent::DEFAULT_CHANNEL_BUFFER,
        }
    }
}

/// Context for one agent run
///
/// Mutated only on the invoking task up until dispatch. Composites that fork
/// sub-invocations copy the struct via [`Invocation::fork`] or
/// [`Invocation::fork_branch`], overriding the agent and, for branches,
/// deriving a child id that is a strict textual extension of the parent's.
#[derive(Clone)]
pub struct Invocation {
    /// Unique invocation id
    pub invocation_id: String,

    /// The agent being run
    pub agent: Option<AgentRef>,

    /// Name of the agent being run
    pub agent_name: String,

    /// Model for LLM agents; filled in by the agent when unset
    pub model: Option<ModelRef>,

    /// The user message that started this invocation
    pub message: Message,

    /// Conversation this invocation belongs to
    pub session: Option<SessionRef>,

    /// Working conversation accumulated within this invocation's flow
    /// (assistant tool-call turns and their tool results)
    pub transcript: Vec<Message>,

    /// Set by a processor to stop the flow loop after the current step
    pub end_invocation: bool,

    /// Channel sizing and other knobs
    pub options: RunOptions,
}

impl Invocation {
    /// A fresh root invocation for `agent` and `message`.
    pub fn new(agent: AgentRef, message: Message) -> Self {
        let name = agent.name().to_string();
        Self {
            invocation_id: format!("inv-{}", Uuid::new_v4()),
            agent: Some(agent),
            agent_name: name,
            model: None,
            message,
            session: None,
            transcript: Vec::new(),
            end_invocation: false,
            options: RunOptions::default(),
        }
    }

    pub fn with_session(mut self, session: SessionRef) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Copy this invocation for a sub-agent, keeping the invocation id.
    ///
    /// Used by sequential composites where the child logically continues the
    /// parent's stream.
    pub fn fork(&self, agent: AgentRef) -> Self {
        let mut child = self.clone();
        child.agent_name = agent.name().to_string();
        child.agent = Some(agent);
        child.transcript = Vec::new();
        child.end_invocation = false;
        child
    }

    /// Copy this invocation for a concurrent branch.
    ///
    /// The child id becomes `<parent>.<forker>.<child>`, keeping branch
    /// streams distinguishable while remaining a strict textual extension of
    /// the parent id.
    pub fn fork_branch(&self, agent: AgentRef, forker: &str) -> Self {
        let mut child = self.fork(agent.clone());
        child.invocation_id = format!("{}.{}.{}", self.invocation_id, forker, agent.name());
        child
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("invocation_id", &self.invocation_id)
            .field("agent_name", &self.agent_name)
            .field("has_model", &self.model.is_some())
            .field("has_session", &self.session.is_some())
            .field("end_invocation", &self.end_invocation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, EventStream};
    use crate::error::Result;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    struct Named(&'static str);

    #[async_trait]
    impl Agent for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self, _ctx: CancellationToken, inv: Invocation) -> Result<EventStream> {
            let (_tx, rx) = tokio::sync::mpsc::channel(inv.options.channel_buffer_size);
            Ok(rx)
        }
    }

    #[test]
    fn test_fork_keeps_id() {
        let parent = Invocation::new(Arc::new(Named("root")), Message::user("hi"));
        let child = parent.fork(Arc::new(Named("sub")));
        assert_eq!(child.invocation_id, parent.invocation_id);
        assert_eq!(child.agent_name, "sub");
    }

    #[test]
    fn test_fork_branch_extends_id() {
        let parent = Invocation::new(Arc::new(Named("root")), Message::user("hi"));
        let child = parent.fork_branch(Arc::new(Named("agent-1")), "fanout");
        assert_eq!(
            child.invocation_id,
            format!("{}.fanout.agent-1", parent.invocation_id)
        );
        assert!(child.invocation_id.starts_with(&parent.invocation_id));
        assert_ne!(child.invocation_id, parent.invocation_id);
    }

    #[test]
    fn test_fork_resets_end_flag() {
        let mut parent = Invocation::new(Arc::new(Named("root")), Message::user("hi"));
        parent.end_invocation = true;
        let child = parent.fork(Arc::new(Named("sub")));
        assert!(!child.end_invocation);
    }
}
