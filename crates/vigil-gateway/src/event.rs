// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use tokio::sync::oneshot;

use crate::gateway::GatewayError;

/// Where an event originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    Message,
    Heartbeat,
    Scheduled,
    Workflow,
}

/// Queue priority. Ordinal order is HIGH < NORMAL < LOW so a
/// min-first binary heap naturally runs HIGH events first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventPriority {
    High = 0,
    Normal = 1,
    Low = 2,
}

impl EventSource {
    /// Default priority for this source, absent an explicit override.
    pub fn default_priority(self) -> EventPriority {
        match self {
            EventSource::Message => EventPriority::High,
            EventSource::Heartbeat => EventPriority::Low,
            EventSource::Scheduled | EventSource::Workflow => EventPriority::Normal,
        }
    }
}

/// The unit of work submitted to the [`crate::Gateway`]. Immutable
/// after submission.
pub struct Event {
    pub id: String,
    pub source: EventSource,
    pub priority: EventPriority,
    pub message: String,
    pub user_id: Option<String>,
    pub channel: Option<String>,
    pub call_type: Option<String>,
    pub metadata: serde_json::Value,
    /// Populated iff the caller wants a reply delivered back to them
    /// (typically `source == Message`). Taken by `submit` and resolved by
    /// the consumer once the agent call completes.
    pub(crate) response_tx: Option<oneshot::Sender<Result<String, GatewayError>>>,
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("priority", &self.priority)
            .field("message", &self.message)
            .field("user_id", &self.user_id)
            .field("channel", &self.channel)
            .field("call_type", &self.call_type)
            .field("has_future", &self.response_tx.is_some())
            .finish()
    }
}

/// Builder for an [`Event`]. `priority` defaults per `source` and can be
/// overridden with [`EventBuilder::priority`].
pub struct EventBuilder {
    source: EventSource,
    message: String,
    priority: Option<EventPriority>,
    user_id: Option<String>,
    channel: Option<String>,
    call_type: Option<String>,
    metadata: serde_json::Value,
    with_future: bool,
}

impl EventBuilder {
    pub fn new(source: EventSource, message: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
            priority: None,
            user_id: None,
            channel: None,
            call_type: None,
            metadata: serde_json::Value::Null,
            with_future: false,
        }
    }

    pub fn priority(mut self, priority: EventPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn call_type(mut self, call_type: impl Into<String>) -> Self {
        self.call_type = Some(call_type.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Request a response future; `submit` returns the matching receiver.
    pub fn with_future(mut self) -> Self {
        self.with_future = true;
        self
    }

    pub(crate) fn build(self) -> (Event, Option<oneshot::Receiver<Result<String, GatewayError>>>) {
        let (tx, rx) = if self.with_future {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let event = Event {
            id: uuid_like(),
            source: self.source,
            priority: self.priority.unwrap_or_else(|| self.source.default_priority()),
            message: self.message,
            user_id: self.user_id,
            channel: self.channel,
            call_type: self.call_type,
            metadata: self.metadata,
            response_tx: tx,
        };
        (event, rx)
    }
}

/// Cheap dependency-free id generator (timestamp + per-process counter).
/// The gateway only needs uniqueness for logging/debugging, not global
/// randomness, so this avoids pulling `uuid` into a crate that otherwise
/// has none of it.
fn uuid_like() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("evt-{}-{n}", std::process::id())
}
