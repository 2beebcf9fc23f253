// ── Outbound reconciler (state store → display) ──
//
// State-change events are coalesced per target: the first event opens a
// debounce window, later events overwrite the pending state, and only the
// latest state is rendered when the window closes. Rendering goes through
// the loop-prevention gate before anything is published.

use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::{self, ControlValue, UNAVAILABLE};
use crate::engine::EngineInner;
use crate::error::CoreError;
use crate::events::SyncEvent;
use crate::model::{Control, ControlId, EntityState, StateChange};
use crate::transport::Message;

// ── Debouncer ───────────────────────────────────────────────────────

/// What a pending state will be rendered onto.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Target {
    Control(ControlId),
    /// A panel's summary indicator, by panel name.
    PanelSummary(String),
}

/// Pending states plus the token every debounce timer listens on.
#[derive(Debug, Default)]
pub(crate) struct Debouncer {
    pending: DashMap<Target, EntityState>,
    cancel: Mutex<CancellationToken>,
}

impl Debouncer {
    /// Store `state` as the latest for `target`. Returns `true` when this
    /// opened a new window and the caller must start its timer.
    fn offer(&self, target: Target, state: EntityState) -> bool {
        match self.pending.entry(target) {
            Entry::Occupied(mut slot) => {
                slot.insert(state);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(state);
                true
            }
        }
    }

    fn take(&self, target: &Target) -> Option<EntityState> {
        self.pending.remove(target).map(|(_, state)| state)
    }

    fn token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cancel every running timer and drop pending states.
    pub(crate) fn cancel_all(&self) {
        let mut token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        token.cancel();
        *token = CancellationToken::new();
        self.pending.clear();
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.pending.len()
    }
}

// ── Event handling ──────────────────────────────────────────────────

/// Route one state change to every control and summary bound to it.
pub(crate) fn on_state_change(inner: &Arc<EngineInner>, change: &StateChange) {
    let model = inner.model.load();
    let targets: Vec<Target> = model
        .controls_for_entity(&change.entity_id)
        .map(|c| Target::Control(c.id.clone()))
        .chain(
            model
                .panels_for_summary_entity(&change.entity_id)
                .map(|p| Target::PanelSummary(p.name.clone())),
        )
        .collect();

    if targets.is_empty() {
        trace!(entity = %change.entity_id, "state change for unbound entity");
        return;
    }

    for target in targets {
        if !inner.debouncer.offer(target.clone(), change.new_state.clone()) {
            trace!(entity = %change.entity_id, ?target, "coalesced into pending window");
            continue;
        }

        let token = inner.debouncer.token();
        let delay = inner.config.debounce;
        let engine = Arc::clone(inner);
        inner.tracker.spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => flush(&engine, &target).await,
            }
        });
    }
}

/// The debounce window for `target` closed: render its latest state.
async fn flush(inner: &Arc<EngineInner>, target: &Target) {
    let Some(state) = inner.debouncer.take(target) else {
        return;
    };
    let model = inner.model.load_full();

    match target {
        Target::Control(id) => {
            // The control may have been removed by a reconfiguration.
            let Some(control) = model.control(id) else {
                return;
            };
            publish_change(inner, control, &state).await;
        }
        Target::PanelSummary(name) => {
            let Some(topic) = model
                .panels()
                .iter()
                .find(|p| &p.name == name)
                .and_then(|p| p.state_topic.clone())
            else {
                return;
            };
            inner.publish(Message::retained(topic, state.state)).await;
        }
    }
}

// ── Rendering ───────────────────────────────────────────────────────

enum Rendering {
    Value(ControlValue),
    Unavailable,
    Nothing,
}

fn render(inner: &EngineInner, control: &Control, state: &EntityState) -> Rendering {
    if codec::is_unavailable(state) {
        return Rendering::Unavailable;
    }
    match codec::encode(control, state) {
        Ok(Some(value)) => Rendering::Value(value),
        Ok(None) => {
            debug!(control = %control.id, state = %state.state, "no matching display value");
            Rendering::Nothing
        }
        Err(e) => {
            warn!(control = %control.id, entity = %control.entity, error = %e, "cannot map entity state");
            inner.emit(SyncEvent::MappingFailed {
                topic: control.binding.state.clone(),
                reason: e.to_string(),
            });
            Rendering::Nothing
        }
    }
}

/// Publish a live state change, unless it is the echo of a display command.
async fn publish_change(inner: &EngineInner, control: &Control, state: &EntityState) {
    let value = match render(inner, control, state) {
        Rendering::Value(value) => value,
        Rendering::Unavailable => {
            publish_state(inner, control, UNAVAILABLE.to_owned()).await;
            return;
        }
        Rendering::Nothing => return,
    };

    if !inner
        .cache
        .outbound_gate(&control.id, &value, inner.config.idempotency_window)
    {
        debug!(control = %control.id, %value, "echo suppressed");
        inner.emit(SyncEvent::EchoSuppressed {
            control: control.id.clone(),
            value,
        });
        return;
    }
    publish_state(inner, control, value.to_payload()).await;
}

/// Publish a value read on request (discovery, refresh). Seeds the cache
/// and bypasses loop-prevention.
pub(crate) async fn publish_snapshot_value(
    inner: &EngineInner,
    control: &Control,
    result: Result<EntityState, CoreError>,
) {
    let state = match result {
        Ok(state) => state,
        Err(e) if e.is_not_found() => {
            warn!(control = %control.id, entity = %control.entity, "bound entity not found");
            inner.emit(SyncEvent::EntityMissing {
                control: control.id.clone(),
                entity: control.entity.entity_id().to_owned(),
            });
            publish_state(inner, control, UNAVAILABLE.to_owned()).await;
            return;
        }
        Err(e) if e.is_timeout() => {
            warn!(control = %control.id, entity = %control.entity, error = %e, "state read timed out");
            publish_state(inner, control, UNAVAILABLE.to_owned()).await;
            return;
        }
        Err(e) => {
            warn!(control = %control.id, error = %e, "state read failed");
            return;
        }
    };

    match render(inner, control, &state) {
        Rendering::Value(value) => {
            inner.cache.record_outbound(&control.id, value.clone());
            publish_state(inner, control, value.to_payload()).await;
        }
        Rendering::Unavailable => publish_state(inner, control, UNAVAILABLE.to_owned()).await,
        Rendering::Nothing => {}
    }
}

async fn publish_state(inner: &EngineInner, control: &Control, payload: String) {
    inner
        .publish(Message::retained(control.binding.state.clone(), payload))
        .await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn target() -> Target {
        Target::Control(ControlId::new("Office", "Lamp"))
    }

    #[test]
    fn later_offers_overwrite_pending_state() {
        let debouncer = Debouncer::default();
        assert!(debouncer.offer(target(), EntityState::new("on")));
        assert!(!debouncer.offer(target(), EntityState::new("off")));
        assert_eq!(debouncer.pending(), 1);

        assert_eq!(debouncer.take(&target()).unwrap().state, "off");
        assert!(debouncer.offer(target(), EntityState::new("on")));
    }

    #[test]
    fn cancel_all_fires_tokens_and_clears() {
        let debouncer = Debouncer::default();
        let token = debouncer.token();
        debouncer.offer(target(), EntityState::new("on"));

        debouncer.cancel_all();
        assert!(token.is_cancelled());
        assert!(!debouncer.token().is_cancelled());
        assert_eq!(debouncer.pending(), 0);
    }
}
