// ── In-memory broker ──
//
// A single-process stand-in for an MQTT broker. Each `MemoryTransport`
// is one client connection; the broker routes publishes to every
// connected client with a matching subscription and keeps retained
// messages for late subscribers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::{Message, Transport, TransportEvent};
use crate::error::CoreError;
use crate::topic;

const CLIENT_CHANNEL_SIZE: usize = 1024;

// ── MemoryBroker ────────────────────────────────────────────────────

/// Shared broker state. Cheaply cloneable.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

#[derive(Default)]
struct BrokerInner {
    retained: DashMap<String, Message>,
    clients: Mutex<Vec<Arc<ClientState>>>,
    log: Mutex<Vec<Message>>,
}

struct ClientState {
    connected: AtomicBool,
    subscriptions: Mutex<Vec<String>>,
    events: broadcast::Sender<TransportEvent>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new, already connected, client connection.
    pub fn client(&self) -> MemoryTransport {
        let (events, _) = broadcast::channel(CLIENT_CHANNEL_SIZE);
        let state = Arc::new(ClientState {
            connected: AtomicBool::new(true),
            subscriptions: Mutex::new(Vec::new()),
            events,
        });
        self.inner
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&state));
        MemoryTransport {
            broker: Arc::clone(&self.inner),
            state,
        }
    }

    /// Every message published through the broker, oldest first.
    pub fn published(&self) -> Vec<Message> {
        self.inner
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Messages published on exactly `topic`, oldest first.
    pub fn published_on(&self, topic: &str) -> Vec<Message> {
        self.inner
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn clear_log(&self) {
        self.inner
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// The retained message currently held for `topic`.
    pub fn retained(&self, topic: &str) -> Option<Message> {
        self.inner.retained.get(topic).map(|m| m.value().clone())
    }
}

impl BrokerInner {
    fn route(&self, message: &Message) {
        if message.retain {
            // An empty retained payload clears the topic.
            if message.payload.is_empty() {
                self.retained.remove(&message.topic);
            } else {
                self.retained.insert(message.topic.clone(), message.clone());
            }
        }
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());

        let clients = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for client in clients {
            if client.wants(&message.topic) {
                let _ = client.events.send(TransportEvent::Message(message.clone()));
            }
        }
    }

    /// Retained messages matching `filter`, sorted by topic.
    fn retained_matching(&self, filter: &str) -> Vec<Message> {
        let mut matching: Vec<Message> = self
            .retained
            .iter()
            .filter(|m| topic::matches(filter, m.key()))
            .map(|m| m.value().clone())
            .collect();
        matching.sort_by(|a, b| a.topic.cmp(&b.topic));
        matching
    }
}

impl ClientState {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn wants(&self, topic_name: &str) -> bool {
        self.is_connected()
            && self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .any(|filter| topic::matches(filter, topic_name))
    }
}

// ── MemoryTransport ─────────────────────────────────────────────────

/// One client connection to a [`MemoryBroker`].
#[derive(Clone)]
pub struct MemoryTransport {
    broker: Arc<BrokerInner>,
    state: Arc<ClientState>,
}

impl MemoryTransport {
    /// Drop the connection. Subscriptions are forgotten.
    pub fn disconnect(&self, reason: impl Into<String>) {
        if self.state.connected.swap(false, Ordering::SeqCst) {
            self.state
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            let reason = reason.into();
            debug!(%reason, "memory transport disconnected");
            let _ = self
                .state
                .events
                .send(TransportEvent::Disconnected { reason });
        }
    }

    /// Re-establish a dropped connection.
    pub fn reconnect(&self) {
        if !self.state.connected.swap(true, Ordering::SeqCst) {
            debug!("memory transport reconnected");
            let _ = self.state.events.send(TransportEvent::Connected);
        }
    }

    fn ensure_connected(&self) -> Result<(), CoreError> {
        if self.state.is_connected() {
            Ok(())
        } else {
            Err(CoreError::transport("not connected"))
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, message: Message) -> Result<(), CoreError> {
        self.ensure_connected()?;
        trace!(topic = %message.topic, retain = message.retain, "publish");
        self.broker.route(&message);
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<(), CoreError> {
        self.ensure_connected()?;
        {
            let mut subscriptions = self
                .state
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !subscriptions.iter().any(|f| f == filter) {
                subscriptions.push(filter.to_owned());
            }
        }
        for message in self.broker.retained_matching(filter) {
            let _ = self.state.events.send(TransportEvent::Message(message));
        }
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.state.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.state.is_connected()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn next_message(rx: &mut broadcast::Receiver<TransportEvent>) -> Message {
        loop {
            if let TransportEvent::Message(m) = rx.recv().await.unwrap() {
                return m;
            }
        }
    }

    #[tokio::test]
    async fn routes_by_wildcard_subscription() {
        let broker = MemoryBroker::new();
        let engine = broker.client();
        let device = broker.client();
        let mut rx = engine.events();

        engine.subscribe("mp/+/+/set").await.unwrap();
        device.publish(Message::new("mp/Desk/Lamp/state", "on")).await.unwrap();
        device.publish(Message::new("mp/Desk/Lamp/set", "off")).await.unwrap();

        let got = next_message(&mut rx).await;
        assert_eq!(got.topic, "mp/Desk/Lamp/set");
        assert_eq!(got.payload_str(), Some("off"));
    }

    #[tokio::test]
    async fn retained_messages_replay_on_subscribe() {
        let broker = MemoryBroker::new();
        let engine = broker.client();
        engine
            .publish(Message::retained("mp/discovery/config", "{}"))
            .await
            .unwrap();

        let device = broker.client();
        let mut rx = device.events();
        device.subscribe("mp/discovery/#").await.unwrap();

        let got = next_message(&mut rx).await;
        assert_eq!(got.topic, "mp/discovery/config");
        assert!(got.retain);

        engine
            .publish(Message::retained("mp/discovery/config", ""))
            .await
            .unwrap();
        assert!(broker.retained("mp/discovery/config").is_none());
    }

    #[tokio::test]
    async fn disconnect_rejects_publish_and_reports_lifecycle() {
        let broker = MemoryBroker::new();
        let client = broker.client();
        let mut rx = client.events();

        client.disconnect("network down");
        assert!(!client.is_connected());
        assert!(client.publish(Message::new("a", "b")).await.is_err());
        assert_eq!(
            rx.recv().await.unwrap(),
            TransportEvent::Disconnected {
                reason: "network down".into()
            }
        );

        client.reconnect();
        assert_eq!(rx.recv().await.unwrap(), TransportEvent::Connected);
        assert!(client.publish(Message::new("a", "b")).await.is_ok());
    }
}
