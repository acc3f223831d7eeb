//! Iterative composition with escalation
//!
//! A [`CycleAgent`] runs its sub-agents in sequence, over and over, until an
//! optional iteration bound is reached, a sub-agent escalates, or the
//! context is cancelled. Escalation is an event with a non-nil error, or a
//! done event carrying the `error` object kind.

use agentflow_core::{
    event_channel, Agent, AgentRef, ErrorKind, Event, EventStream, Invocation, Result, ToolRef,
};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Runs sub-agents in a loop until a stop condition fires
pub struct CycleAgent {
    name: String,
    description: String,
    sub_agents: Vec<AgentRef>,
    max_iterations: Option<usize>,
}

impl CycleAgent {
    pub fn new(name: impl Into<String>, sub_agents: Vec<AgentRef>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            sub_agents,
            max_iterations: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Bound the number of full iterations over the sub-agent list.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = Some(max);
        self
    }
}

#[async_trait]
impl Agent for CycleAgent {
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
        let max_iterations = self.max_iterations;

        tokio::spawn(async move {
            let mut iterations = 0usize;
            'cycle: while max_iterations.is_none_or(|max| iterations < max) {
                if sub_agents.is_empty() {
                    break;
                }
                for agent in &sub_agents {
                    if ctx.is_cancelled() {
                        break 'cycle;
                    }
                    let child = invocation.fork(agent.clone());
                    let mut events = match agent.run(ctx.clone(), child).await {
                        Ok(events) => events,
                        Err(e) => {
                            tracing::warn!(agent = agent.name(), error = %e, "sub-agent failed");
                            let _ = tx
                                .send(Event::error(
                                    &invocation.invocation_id,
                                    agent.name(),
                                    ErrorKind::FlowError,
                                    e.to_string(),
                                ))
                                .await;
                            break 'cycle;
                        }
                    };
                    while let Some(event) = events.recv().await {
                        let escalate = event.is_escalation();
                        if tx.send(event).await.is_err() {
                            break 'cycle;
                        }
                        if escalate {
                            tracing::debug!(agent = agent.name(), iterations, "escalation, stopping cycle");
                            break 'cycle;
                        }
                    }
                }
                iterations += 1;
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EmitterAgent, ErrorEventAgent};
    use agentflow_core::Message;
    use std::sync::Arc;

    async fn collect(mut rx: EventStream) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        events
    }

    #[tokio::test]
    async fn test_cycle_runs_bounded_iterations() {
        let cycle: AgentRef = Arc::new(
            CycleAgent::new("loop", vec![Arc::new(EmitterAgent::new("worker", 1))])
                .with_max_iterations(3),
        );
        let invocation = Invocation::new(cycle.clone(), Message::user("go"));
        let rx = cycle.run(CancellationToken::new(), invocation).await.unwrap();
        assert_eq!(collect(rx).await.len(), 3);
    }

    #[tokio::test]
    async fn test_escalation_stops_after_one_iteration() {
        let cycle: AgentRef = Arc::new(
            CycleAgent::new(
                "loop",
                vec![
                    Arc::new(EmitterAgent::new("worker", 1)),
                    Arc::new(ErrorEventAgent::new("guard")),
                ],
            )
            .with_max_iterations(10),
        );
        let invocation = Invocation::new(cycle.clone(), Message::user("go"));
        let rx = cycle.run(CancellationToken::new(), invocation).await.unwrap();
        let events = collect(rx).await;

        // One worker event plus the escalating error event; iteration 2
        // never starts.
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].author, "worker");
        assert!(events[1].error.is_some());
    }

    #[tokio::test]
    async fn test_zero_max_iterations_closes_immediately() {
        let cycle: AgentRef = Arc::new(
            CycleAgent::new("loop", vec![Arc::new(EmitterAgent::new("worker", 1))])
                .with_max_iterations(0),
        );
        let invocation = Invocation::new(cycle.clone(), Message::user("go"));
        let rx = cycle.run(CancellationToken::new(), invocation).await.unwrap();
        let events = collect(rx).await;
        assert!(events.iter().all(|e| e.error.is_none()));
        assert!(events.is_empty());
    }
}
