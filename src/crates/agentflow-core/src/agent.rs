//! The `Agent` contract and event channel plumbing
//!
//! An [`Agent`] turns one invocation into a bounded, lazy, non-restartable
//! stream of events. Setup errors are returned synchronously from [`Agent::run`];
//! execution errors arrive as a terminal error event before the channel
//! closes. The channel is closed exactly once, by the task that owns its
//! sender, when the agent completes or the context is cancelled.

use crate::error::{AgentError, Result};
use crate::event::Event;
use crate::invocation::Invocation;
use crate::tool::ToolRef;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default bound of an invocation's event channel
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Receiving half of an invocation's event channel
pub type EventStream = mpsc::Receiver<Event>;

/// A runnable agent
///
/// Implementations include leaf LLM agents, composites (chain, parallel,
/// cycle), and graph-backed agents. All of them honor the same contract:
/// one `run` call, one event channel, cancellation via `ctx`.
#[async_trait]
pub trait Agent: Send + Sync {
    /// The agent's unique name within its parent.
    fn name(&self) -> &str;

    /// Short description used in transfer-tool schemas and identity prompts.
    fn description(&self) -> &str {
        ""
    }

    /// Run one invocation, returning its event stream.
    async fn run(&self, ctx: CancellationToken, invocation: Invocation) -> Result<EventStream>;

    /// The tools this agent offers to its model.
    fn tools(&self) -> Vec<ToolRef> {
        Vec::new()
    }

    /// Directly nested sub-agents.
    fn sub_agents(&self) -> Vec<Arc<dyn Agent>> {
        Vec::new()
    }

    /// Locate a direct sub-agent by name.
    fn find_sub_agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.sub_agents().into_iter().find(|a| a.name() == name)
    }
}

/// Shared agent handle
pub type AgentRef = Arc<dyn Agent>;

/// Cancellation-aware sending half of an event channel
///
/// Every send races the channel against context cancellation, so a producer
/// blocked on a full channel unblocks as soon as the invocation is cancelled
/// and exits without touching the channel again.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
    ctx: CancellationToken,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<Event>, ctx: CancellationToken) -> Self {
        Self { tx, ctx }
    }

    /// The cancellation context this sender is bound to.
    pub fn context(&self) -> &CancellationToken {
        &self.ctx
    }

    /// Send `event`, or fail with [`AgentError::Cancelled`] if the context
    /// is cancelled first (including while blocked on a full channel).
    pub async fn send(&self, event: Event) -> Result<()> {
        tokio::select! {
            res = self.tx.send(event) => res.map_err(|_| AgentError::Cancelled),
            _ = self.ctx.cancelled() => Err(AgentError::Cancelled),
        }
    }
}

/// Create a bounded event channel of `buffer` capacity bound to `ctx`.
pub fn event_channel(buffer: usize, ctx: CancellationToken) -> (EventSender, EventStream) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (EventSender::new(tx, ctx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_and_receive() {
        let (tx, mut rx) = event_channel(4, CancellationToken::new());
        tx.send(Event::new("inv-1", "a")).await.unwrap();
        drop(tx);
        assert_eq!(rx.recv().await.unwrap().author, "a");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_on_cancelled_context() {
        let ctx = CancellationToken::new();
        let (tx, _rx) = event_channel(1, ctx.clone());
        // Fill the buffer so the next send would block.
        tx.send(Event::new("inv-1", "a")).await.unwrap();
        ctx.cancel();
        let err = tx.send(Event::new("inv-1", "a")).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }

    #[tokio::test]
    async fn test_blocked_producer_unblocks_on_cancel() {
        let ctx = CancellationToken::new();
        let (tx, rx) = event_channel(1, ctx.clone());
        tx.send(Event::new("inv-1", "a")).await.unwrap();

        let ctx2 = ctx.clone();
        let handle = tokio::spawn(async move {
            // Blocks on the full channel until cancellation fires.
            tx.send(Event::new("inv-1", "b")).await
        });
        tokio::task::yield_now().await;
        ctx2.cancel();

        assert!(handle.await.unwrap().is_err());
        // Consumer sees only the event that made it in before cancellation.
        let mut rx = rx;
        assert_eq!(rx.recv().await.unwrap().author, "a");
        assert!(rx.recv().await.is_none());
    }
}
