//! Concurrent fan-out over sub-agents
//!
//! A [`ParallelAgent`] starts every sub-agent on its own branch invocation
//! (`<parent>.<self>.<child>`) and merges their event streams into the
//! parent channel. Ordering is preserved within a branch, undefined across
//! branches. One branch's setup failure emits a `FlowError` event without
//! cancelling the others; cancelling the parent cancels every branch.
//!
//! The start phase is serialized: every sub-agent's `run` returns before any
//! forwarder starts draining, so a failed start never races the merge.

use agentflow_core::{
    event_channel, Agent, AgentRef, ErrorKind, Event, EventStream, Invocation, Result, ToolRef,
};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Runs sub-agents concurrently, merging their streams
pub struct ParallelAgent {
    name: String,
    description: String,
    sub_agents: Vec<AgentRef>,
}

impl ParallelAgent {
    pub fn new(name: impl Into<String>, sub_agents: Vec<AgentRef>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            sub_agents,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl Agent for ParallelAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn sub_agents(&self) -> Vec<AgentRef> {
        self.sub_agents.clone()
    }

    fn tools(&self) -> Vec<ToolRef> {
        Vec::new()
    }

    async fn run(&self, ctx: CancellationToken, invocation: Invocation) -> Result<EventStream> {
        let (tx, rx) = event_channel(invocation.options.channel_buffer_size, ctx.clone());

        // Start phase: every branch starts (or fails) before merging begins.
        let mut branches = Vec::new();
        for agent in &self.sub_agents {
            let branch_ctx = ctx.child_token();
            let child = invocation.fork_branch(agent.clone(), &self.name);
            match agent.run(branch_ctx, child).await {
                Ok(events) => branches.push(events),
                Err(e) => {
                    tracing::warn!(agent = agent.name(), error = %e, "branch setup failed");
                    let _ = tx
                        .send(Event::error(
                            &invocation.invocation_id,
                            agent.name(),
                            ErrorKind::FlowError,
                            e.to_string(),
                        ))
                        .await;
                }
            }
        }

        // Merge phase: one forwarder per branch; the parent channel closes
        // when the last sender drops.
        for mut branch in branches {
            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some(event) = branch.recv().await {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        Ok(rx)
    }
}
