//! Session state shared across invocations of one conversation

use crate::event::Event;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One logical conversation: identity plus its accumulated events
///
/// Sessions are shared between the runner and in-flight invocations, so the
/// canonical handle is [`SessionRef`] (an async `RwLock`). Only completed,
/// non-partial events are appended; streamed chunks are transient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session id, unique within `(app_name, user_id)`
    pub id: String,

    /// Owning application
    pub app_name: String,

    /// Owning user
    pub user_id: String,

    /// Completed events, oldest first
    #[serde(default)]
    pub events: Vec<Event>,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Last append time
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            app_name: app_name.into(),
            user_id: user_id.into(),
            events: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a completed event.
    pub fn append_event(&mut self, event: Event) {
        self.updated_at = Utc::now();
        self.events.push(event);
    }
}

/// Shared session handle
pub type SessionRef = Arc<RwLock<Session>>;
