//! Event envelopes streamed out of every agent invocation
//!
//! An [`Event`] is one item on an invocation's stream: a model response, a
//! tool result, an error, or a graph-node lifecycle marker. Events are
//! immutable once enqueued; `done = true` marks the last event of an
//! invocation and appears exactly once per channel.

use crate::error::ErrorKind;
use crate::model::{ObjectKind, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Error descriptor attached to error events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventError {
    /// Error classification
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
}

/// One item on an invocation's event stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Invocation this event belongs to
    pub invocation_id: String,

    /// Agent or node that produced the event
    pub author: String,

    /// Unique event id
    pub id: String,

    /// Production time, nanosecond precision (RFC3339 nanos on the wire)
    pub timestamp: DateTime<Utc>,

    /// The response payload, when the event carries one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,

    /// Error descriptor for error events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EventError>,

    /// Structured state delta keyed by channel / metadata name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_delta: Option<HashMap<String, Value>>,

    /// True on the last event of the invocation
    #[serde(default)]
    pub done: bool,
}

impl Event {
    /// An empty event authored by `author` within `invocation_id`.
    pub fn new(invocation_id: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            author: author.into(),
            id: format!("evt-{}", Uuid::new_v4()),
            timestamp: Utc::now(),
            response: None,
            error: None,
            state_delta: None,
            done: false,
        }
    }

    /// An event wrapping `response`; `done` is set for non-partial responses.
    pub fn from_response(
        invocation_id: impl Into<String>,
        author: impl Into<String>,
        response: Response,
    ) -> Self {
        let done = !response.is_partial;
        let mut event = Self::new(invocation_id, author);
        event.done = done;
        event.response = Some(response);
        event
    }

    /// A terminal error event with the given kind and message.
    pub fn error(
        invocation_id: impl Into<String>,
        author: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(invocation_id, author);
        event.done = true;
        event.error = Some(EventError {
            kind,
            message: message.into(),
        });
        event
    }

    /// Override the `done` flag.
    pub fn with_done(mut self, done: bool) -> Self {
        self.done = done;
        self
    }

    /// Attach a state delta.
    pub fn with_state_delta(mut self, delta: HashMap<String, Value>) -> Self {
        self.state_delta = Some(delta);
        self
    }

    /// Whether this event ends the step loop.
    ///
    /// Final means: a non-nil error, or `done` with at least one choice and
    /// an object kind other than `tool.response` (tool results always loop
    /// back into the model).
    pub fn is_final(&self) -> bool {
        if self.error.is_some() {
            return true;
        }
        match &self.response {
            Some(resp) => {
                self.done && !resp.choices.is_empty() && resp.object != ObjectKind::ToolResponse
            }
            None => false,
        }
    }

    /// Whether an enclosing cycle agent should stop on this event.
    ///
    /// Escalation fires on any error, and on a done event whose response
    /// carries the `error` object kind.
    pub fn is_escalation(&self) -> bool {
        if self.error.is_some() {
            return true;
        }
        self.done
            && self
                .response
                .as_ref()
                .is_some_and(|r| r.object == ObjectKind::Error)
    }
}
