// ── Transport adapter ──
//
// The engine's view of the publish/subscribe connection. Adapters deliver
// inbound messages and connection lifecycle changes through one broadcast
// channel; subscribers receive retained messages when they subscribe.

mod memory;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use crate::error::CoreError;

pub use memory::{MemoryBroker, MemoryTransport};

// ── Message ─────────────────────────────────────────────────────────

/// A single publish/subscribe message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
        }
    }

    /// A message the broker keeps for late subscribers.
    pub fn retained(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            retain: true,
            ..Self::new(topic, payload)
        }
    }

    /// The payload as UTF-8, if it is valid.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload = self.payload_str().unwrap_or("<binary>");
        let retain = if self.retain { " (retained)" } else { "" };
        write!(f, "{} {payload}{retain}", self.topic)
    }
}

// ── TransportEvent ──────────────────────────────────────────────────

/// Everything a transport reports to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: String },
    Message(Message),
}

// ── Transport ───────────────────────────────────────────────────────

/// Abstraction over an MQTT-style connection.
///
/// Subscriptions do not survive a disconnect: the engine subscribes again
/// each time it sees [`TransportEvent::Connected`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a message. Fails with [`CoreError::Transport`] while
    /// disconnected.
    async fn publish(&self, message: Message) -> Result<(), CoreError>;

    /// Subscribe to a topic filter (`+` and `#` wildcards allowed).
    async fn subscribe(&self, filter: &str) -> Result<(), CoreError>;

    /// Receiver for messages and lifecycle events.
    fn events(&self) -> broadcast::Receiver<TransportEvent>;

    fn is_connected(&self) -> bool;
}
