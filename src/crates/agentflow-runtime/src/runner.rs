//! The runner facade: session-scoped entry point for agent invocations
//!
//! A [`Runner`] binds an application name, a root agent, and a
//! [`SessionService`]. Each `run` call loads (or creates) the session,
//! records the user message, starts the agent, and forwards its event
//! stream to the caller while persisting completed events.

use crate::session::SessionService;
use agentflow_core::{
    event_channel, AgentRef, Choice, Event, EventStream, Invocation, Message, ObjectKind,
    Response, Result, RunOptions,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Session-scoped entry point binding user messages to an agent
pub struct Runner {
    app_name: String,
    agent: AgentRef,
    sessions: Arc<dyn SessionService>,
    options: RunOptions,
}

impl Runner {
    pub fn new(
        app_name: impl Into<String>,
        agent: AgentRef,
        sessions: Arc<dyn SessionService>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            agent,
            sessions,
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Run `message` against the bound agent within the given session.
    ///
    /// Completed (non-partial) events are appended to the session as they
    /// stream; callers wanting a single answer take the last event with
    /// `done = true`.
    pub async fn run(
        &self,
        ctx: CancellationToken,
        user_id: &str,
        session_id: &str,
        message: Message,
    ) -> Result<EventStream> {
        let session = self
            .sessions
            .get_or_create(&self.app_name, user_id, session_id)
            .await?;

        // Record the user turn before the agent observes the session.
        let invocation = Invocation::new(self.agent.clone(), message.clone())
            .with_session(session.clone())
            .with_options(self.options.clone());
        let user_event = user_message_event(&invocation.invocation_id, message);
        self.sessions.append_event(&session, user_event).await?;

        tracing::debug!(
            app = %self.app_name,
            user = user_id,
            session = session_id,
            invocation = %invocation.invocation_id,
            "starting invocation"
        );

        let mut inner = self.agent.run(ctx.clone(), invocation).await?;
        let (tx, rx) = event_channel(self.options.channel_buffer_size, ctx);
        let sessions = self.sessions.clone();

        tokio::spawn(async move {
            while let Some(event) = inner.recv().await {
                if should_persist(&event) {
                    if let Err(e) = sessions.append_event(&session, event.clone()).await {
                        tracing::warn!(error = %e, "failed to persist event");
                    }
                }
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}

/// Completed responses and errors are history; streamed chunks are not.
fn should_persist(event: &Event) -> bool {
    if event.error.is_some() {
        return true;
    }
    event
        .response
        .as_ref()
        .is_some_and(|response| !response.is_partial)
}

fn user_message_event(invocation_id: &str, message: Message) -> Event {
    let mut response = Response::new(ObjectKind::ChatCompletion);
    response.choices.push(Choice {
        index: 0,
        delta: None,
        message: Some(message),
        finish_reason: None,
    });
    let mut event = Event::from_response(invocation_id, "user", response);
    event.done = false;
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_agent::LlmAgent;
    use crate::session::InMemorySessionService;
    use crate::testing::ScriptedModel;

    async fn collect(mut rx: EventStream) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        events
    }

    #[tokio::test]
    async fn test_runner_persists_history_across_turns() {
        let model = Arc::new(ScriptedModel::new(
            "m",
            vec![
                vec![Response::assistant("first answer")],
                vec![Response::assistant("second answer")],
            ],
        ));
        let agent: AgentRef = Arc::new(
            LlmAgent::builder("helper").with_model(model.clone()).build(),
        );
        let sessions = Arc::new(InMemorySessionService::new());
        let runner = Runner::new("demo", agent, sessions.clone());

        let rx = runner
            .run(CancellationToken::new(), "u1", "s1", Message::user("one"))
            .await
            .unwrap();
        let events = collect(rx).await;
        assert_eq!(events.len(), 1);

        let rx = runner
            .run(CancellationToken::new(), "u1", "s1", Message::user("two"))
            .await
            .unwrap();
        collect(rx).await;

        // Second request sees the whole prior conversation.
        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        let contents: Vec<_> = requests[1]
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert!(contents.contains(&"one"));
        assert!(contents.contains(&"first answer"));
        assert!(contents.contains(&"two"));

        // Session history: user turn + answer, per run.
        let session = sessions.get("demo", "u1", "s1").await.unwrap().unwrap();
        assert_eq!(session.read().await.events.len(), 4);
    }

    #[tokio::test]
    async fn test_single_answer_is_last_done_event() {
        let agent: AgentRef = Arc::new(
            LlmAgent::builder("helper")
                .with_model(Arc::new(ScriptedModel::new(
                    "m",
                    vec![vec![Response::assistant("the answer")]],
                )))
                .build(),
        );
        let runner = Runner::new(
            "demo",
            agent,
            Arc::new(InMemorySessionService::new()),
        );
        let rx = runner
            .run(CancellationToken::new(), "u1", "s1", Message::user("q"))
            .await
            .unwrap();
        let events = collect(rx).await;

        let finals: Vec<_> = events.iter().filter(|e| e.done).collect();
        assert_eq!(finals.len(), 1);
        assert!(std::ptr::eq(*finals.last().unwrap(), events.last().unwrap()));
    }
}
