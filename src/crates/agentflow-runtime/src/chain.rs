//! Sequential composition of sub-agents
//!
//! A [`ChainAgent`] runs its sub-agents in order, forwarding every event to
//! the parent channel. The first error - whether a setup failure or an error
//! event from a sub-agent - stops the chain; remaining sub-agents never run.

use agentflow_core::{
    event_channel, Agent, AgentRef, ErrorKind, Event, EventStream, Invocation, Result, ToolRef,
};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Runs sub-agents one after another on a shared event channel
pub struct ChainAgent {
    name: String,
    description: String,
    sub_agents: Vec<AgentRef>,
}

impl ChainAgent {
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
impl Agent for ChainAgent {
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
        let sub_agents = self.sub_agents.clone();

        tokio::spawn(async move {
            'chain: for agent in sub_agents {
                if ctx.is_cancelled() {
                    break;
                }
                let child = invocation.fork(agent.clone());
                let mut events = match agent.run(ctx.clone(), child).await {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!(agent = agent.name(), error = %e, "sub-agent setup failed");
                        let _ = tx
                            .send(Event::error(
                                &invocation.invocation_id,
                                agent.name(),
                                ErrorKind::FlowError,
                                e.to_string(),
                            ))
                            .await;
                        break 'chain;
                    }
                };
                while let Some(event) = events.recv().await {
                    let errored = event.error.is_some();
                    if tx.send(event).await.is_err() {
                        break 'chain;
                    }
                    if errored {
                        break 'chain;
                    }
                }
            }
        });

        Ok(rx)
    }
}
