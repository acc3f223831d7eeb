//! Session services: shared conversation state across invocations

use agentflow_core::{Event, Result, Session, SessionRef};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Storage backend for sessions
///
/// Shared across invocations; implementations must be safe under concurrent
/// access. The in-memory service below is the reference implementation;
/// SQLite/Redis-backed services implement the same trait externally.
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Fetch a session, creating it if absent.
    async fn get_or_create(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<SessionRef>;

    /// Fetch an existing session.
    async fn get(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<SessionRef>>;

    /// Append a completed event.
    async fn append_event(&self, session: &SessionRef, event: Event) -> Result<()>;

    /// Remove a session.
    async fn delete(&self, app_name: &str, user_id: &str, session_id: &str) -> Result<()>;
}

type SessionKey = (String, String, String);

/// Map-backed session service for development and tests
#[derive(Default)]
pub struct InMemorySessionService {
    sessions: RwLock<HashMap<SessionKey, SessionRef>>,
}

impl InMemorySessionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionService for InMemorySessionService {
    async fn get_or_create(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<SessionRef> {
        let key = (
            app_name.to_string(),
            user_id.to_string(),
            session_id.to_string(),
        );
        let mut sessions = self.sessions.write().await;
        Ok(sessions
            .entry(key)
            .or_insert_with(|| {
                Arc::new(RwLock::new(Session::new(app_name, user_id, session_id)))
            })
            .clone())
    }

    async fn get(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<SessionRef>> {
        let key = (
            app_name.to_string(),
            user_id.to_string(),
            session_id.to_string(),
        );
        Ok(self.sessions.read().await.get(&key).cloned())
    }

    async fn append_event(&self, session: &SessionRef, event: Event) -> Result<()> {
        session.write().await.append_event(event);
        Ok(())
    }

    async fn delete(&self, app_name: &str, user_id: &str, session_id: &str) -> Result<()> {
        let key = (
            app_name.to_string(),
            user_id.to_string(),
            session_id.to_string(),
        );
        self.sessions.write().await.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let service = InMemorySessionService::new();
        let a = service.get_or_create("app", "u", "s1").await.unwrap();
        let b = service.get_or_create("app", "u", "s1").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(service.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let service = InMemorySessionService::new();
        let session = service.get_or_create("app", "u", "s1").await.unwrap();
        service
            .append_event(&session, Event::new("inv-1", "helper"))
            .await
            .unwrap();
        assert_eq!(session.read().await.events.len(), 1);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let service = InMemorySessionService::new();
        let s1 = service.get_or_create("app", "u", "s1").await.unwrap();
        let _s2 = service.get_or_create("app", "u", "s2").await.unwrap();
        service
            .append_event(&s1, Event::new("inv-1", "helper"))
            .await
            .unwrap();

        let s2 = service.get("app", "u", "s2").await.unwrap().unwrap();
        assert!(s2.read().await.events.is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let service = InMemorySessionService::new();
        assert!(service.delete("app", "u", "nope").await.is_ok());
    }
}
