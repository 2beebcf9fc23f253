// ── Synchronization engine ──
//
// Wires the transport and the state store together through the panel
// model: one task drains transport events, one task drains state-store
// changes, and everything that may block (commands, discovery reads,
// debounce timers) runs on the engine's task tracker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::{Semaphore, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::cache::{CacheEntry, ValueCache};
use crate::config::SyncConfig;
use crate::discovery::{self, Announce, DeviceRegistry, DeviceStatus};
use crate::error::CoreError;
use crate::events::SyncEvent;
use crate::inbound;
use crate::model::{ControlId, EntityRef, EntityState, PanelConfig, PanelModel};
use crate::outbound::{self, Debouncer};
use crate::store::{StateStore, StateSubscription};
use crate::transport::{Message, Transport, TransportEvent};

const EVENT_CHANNEL_SIZE: usize = 256;

// ── ConnectionState ─────────────────────────────────────────────────

/// Transport connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

// ── Notification ────────────────────────────────────────────────────

/// A transient message shown on every display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

impl Notification {
    pub const DEFAULT_TITLE: &'static str = "Info";
    pub const DEFAULT_DURATION_MS: u64 = 5000;

    pub fn new(message: impl Into<String>) -> Self {
        Self {
            title: Self::DEFAULT_TITLE.to_owned(),
            message: message.into(),
            duration_ms: Self::DEFAULT_DURATION_MS,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

// ── Engine ──────────────────────────────────────────────────────────

/// The panel synchronization engine.
///
/// Cheaply cloneable via `Arc<EngineInner>`. Construct with
/// [`new()`](Self::new), then [`start()`](Self::start) to begin
/// reconciling; [`shutdown()`](Self::shutdown) stops every task.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    pub(crate) config: SyncConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) store: Arc<dyn StateStore>,
    pub(crate) model: ArcSwap<PanelModel>,
    pub(crate) cache: ValueCache,
    pub(crate) registry: DeviceRegistry,
    pub(crate) debouncer: Debouncer,
    pub(crate) commands: Arc<Semaphore>,
    reads: Arc<Semaphore>,
    pub(crate) discovery_lock: tokio::sync::Mutex<()>,
    pub(crate) tracker: TaskTracker,
    event_tx: broadcast::Sender<SyncEvent>,
    connection_state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    subscription: Mutex<CancellationToken>,
    started: AtomicBool,
}

impl EngineInner {
    pub(crate) fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    /// Read an entity under the in-flight limit and the command timeout.
    /// A read that does not finish in time fails with `Timeout`.
    pub(crate) async fn read(&self, entity: &EntityRef) -> Result<EntityState, CoreError> {
        let _permit = Arc::clone(&self.reads)
            .acquire_owned()
            .await
            .map_err(|_| CoreError::Internal("read limiter closed".into()))?;

        let timeout = self.config.command_timeout;
        tokio::time::timeout(timeout, self.store.get_value(entity))
            .await
            .unwrap_or_else(|_| {
                Err(CoreError::Timeout {
                    entity: entity.entity_id().to_owned(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            })
    }

    /// Publish through the transport. Failures are logged, not returned:
    /// a disconnect triggers a full resync anyway.
    pub(crate) async fn publish(&self, message: Message) -> bool {
        let topic = message.topic.clone();
        let payload = message.payload_str().unwrap_or_default().to_owned();
        match self.transport.publish(message).await {
            Ok(()) => {
                trace!(%topic, %payload, "published");
                self.emit(SyncEvent::Published { topic, payload });
                true
            }
            Err(e) => {
                warn!(%topic, error = %e, "publish failed");
                false
            }
        }
    }
}

impl Engine {
    /// Validate configuration and build the initial panel model. Does NOT
    /// touch either adapter; call [`start()`](Self::start) for that.
    pub fn new(
        config: SyncConfig,
        panels: &[PanelConfig],
        transport: Arc<dyn Transport>,
        store: Arc<dyn StateStore>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let model = PanelModel::build(&config.topic_base, panels)?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        Ok(Self {
            inner: Arc::new(EngineInner {
                commands: Arc::new(Semaphore::new(config.max_in_flight)),
                reads: Arc::new(Semaphore::new(config.max_in_flight)),
                config,
                transport,
                store,
                model: ArcSwap::from_pointee(model),
                cache: ValueCache::new(),
                registry: DeviceRegistry::new(),
                debouncer: Debouncer::default(),
                discovery_lock: tokio::sync::Mutex::new(()),
                tracker: TaskTracker::new(),
                event_tx,
                connection_state,
                subscription: Mutex::new(cancel.child_token()),
                cancel,
                started: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// The panel model currently in effect.
    pub fn model(&self) -> Arc<PanelModel> {
        self.inner.model.load_full()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start the background tasks. If the transport is already connected
    /// the engine subscribes immediately. Calling `start` twice is a no-op.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Take the receiver before subscribing so retained replays land in it.
        let events = self.inner.transport.events();
        self.inner
            .tracker
            .spawn(transport_task(self.clone(), events));
        self.restart_state_subscription();

        if self.inner.transport.is_connected() {
            self.on_connected().await?;
        }

        let model = self.model();
        info!(
            base = %model.topics().base(),
            panels = model.panels().len(),
            controls = model.all_controls().len(),
            "engine started"
        );
        Ok(())
    }

    /// Stop every task and wait for in-flight work to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.debouncer.cancel_all();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        let _ = self
            .inner
            .connection_state
            .send(ConnectionState::Disconnected);
        info!("engine stopped");
    }

    /// Validate `panels` and swap the new model in atomically.
    ///
    /// On error the previous model stays in effect. On success, cache
    /// entries for removed controls are pruned, their retained state is
    /// cleared and the definition is republished.
    pub async fn reconfigure(&self, panels: &[PanelConfig]) -> Result<(), CoreError> {
        let model = Arc::new(PanelModel::build(&self.inner.config.topic_base, panels)?);
        let previous = self.inner.model.swap(Arc::clone(&model));

        self.inner.cache.prune(&model);
        self.restart_state_subscription();

        info!(
            panels = model.panels().len(),
            controls = model.all_controls().len(),
            "panel model replaced"
        );
        self.inner.emit(SyncEvent::Reconfigured {
            panels: model.panels().len(),
            controls: model.all_controls().len(),
        });

        if self.inner.transport.is_connected() {
            for removed in previous
                .all_controls()
                .iter()
                .filter(|c| !model.contains(&c.id))
            {
                self.inner
                    .publish(Message::retained(removed.binding.state.clone(), ""))
                    .await;
            }
            self.resync().await;
        }
        Ok(())
    }

    /// Republish the definition and every control's state.
    ///
    /// Uses the most recent announcement's capabilities, or none when no
    /// device has announced yet.
    pub async fn resync(&self) {
        let latest = self.inner.registry.latest();
        discovery::run(&self.inner, latest.as_ref()).await;
    }

    /// Publish a notification on the notify topic.
    pub async fn notify(&self, notification: &Notification) -> Result<(), CoreError> {
        let payload = serde_json::to_string(notification)
            .map_err(|e| CoreError::Internal(format!("notification encoding failed: {e}")))?;
        let topic = self.inner.model.load().topics().notify();
        self.inner
            .transport
            .publish(Message::new(topic, payload))
            .await
    }

    // ── State observation ────────────────────────────────────────────

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// Subscribe to the observability event stream.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Every device that has announced itself, sorted by id.
    pub fn devices(&self) -> Vec<DeviceStatus> {
        self.inner.registry.snapshot()
    }

    pub fn device(&self, device_id: &str) -> Option<DeviceStatus> {
        self.inner.registry.get(device_id)
    }

    /// Last values seen for a control, from either side.
    pub fn last_known(&self, id: &ControlId) -> Option<CacheEntry> {
        self.inner.cache.get(id)
    }

    // ── Internals ────────────────────────────────────────────────────

    fn restart_state_subscription(&self) {
        let token = self.inner.cancel.child_token();
        {
            let mut current = self
                .inner
                .subscription
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            current.cancel();
            *current = token.clone();
        }

        let entities = self.inner.model.load().watched_entities();
        debug!(entities = entities.len(), "subscribing to state changes");
        let subscription = self.inner.store.subscribe_state_changes(entities);
        self.inner.tracker.spawn(state_task(
            Arc::clone(&self.inner),
            subscription,
            token,
        ));
    }

    async fn on_connected(&self) -> Result<(), CoreError> {
        let _ = self.inner.connection_state.send(ConnectionState::Connected);
        let topics = self.inner.model.load().topics().clone();
        for filter in topics.subscriptions() {
            self.inner.transport.subscribe(&filter).await?;
        }
        info!(base = %topics.base(), "transport connected");

        if self.inner.registry.latest().is_some() || self.inner.config.publish_on_connect {
            let engine = self.clone();
            self.inner.tracker.spawn(async move { engine.resync().await });
        }
        Ok(())
    }

    fn on_disconnected(&self, reason: &str) {
        // Caches are kept; the reconnect resync overwrites whatever is stale.
        self.inner.debouncer.cancel_all();
        let _ = self
            .inner
            .connection_state
            .send(ConnectionState::Disconnected);
        warn!(%reason, "transport disconnected");
    }

    fn route_message(&self, message: &Message) {
        let model = self.inner.model.load();

        if message.topic == model.topics().announce() {
            match Announce::parse(&message.payload) {
                Ok(announce) => {
                    debug!(device_id = %announce.device_id, "device announced");
                    let inner = Arc::clone(&self.inner);
                    self.inner
                        .tracker
                        .spawn(async move { discovery::run(&inner, Some(&announce)).await });
                }
                Err(e) => {
                    warn!(topic = %message.topic, error = %e, "ignoring announce");
                    self.inner.emit(SyncEvent::MappingFailed {
                        topic: message.topic.clone(),
                        reason: e.to_string(),
                    });
                }
            }
            return;
        }

        if let Some(control) = model.resolve(&message.topic) {
            inbound::on_command(&self.inner, Arc::clone(control), message);
        } else if let Some(control) = model.resolve_refresh(&message.topic) {
            inbound::on_refresh(&self.inner, Arc::clone(control));
        } else {
            debug!(topic = %message.topic, "no control bound to topic");
            self.inner.emit(SyncEvent::UnknownTopic {
                topic: message.topic.clone(),
            });
        }
    }
}

// ── Background tasks ────────────────────────────────────────────────

/// Drain transport events. Never awaits the state store.
async fn transport_task(engine: Engine, mut events: broadcast::Receiver<TransportEvent>) {
    let cancel = engine.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(TransportEvent::Message(message)) => engine.route_message(&message),
                Ok(TransportEvent::Connected) => {
                    if let Err(e) = engine.on_connected().await {
                        warn!(error = %e, "subscribing after reconnect failed");
                    }
                }
                Ok(TransportEvent::Disconnected { reason }) => engine.on_disconnected(&reason),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "transport receiver lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    debug!("transport task finished");
}

/// Drain state-store changes into the outbound reconciler.
async fn state_task(
    inner: Arc<EngineInner>,
    mut subscription: StateSubscription,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            change = subscription.recv() => {
                let Some(change) = change else { break };
                outbound::on_state_change(&inner, &change);
            }
        }
    }
    debug!("state subscription finished");
}
