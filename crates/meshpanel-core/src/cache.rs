// ── Per-control value cache ──
//
// Remembers the last value seen from each side of a control so that the
// state store echoing a display command back does not bounce it to the
// display again. Each control owns its own lock; there is no global lock.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::codec::ControlValue;
use crate::model::{ControlId, PanelModel};

/// A value together with the monotonic instant it was observed.
#[derive(Debug, Clone, PartialEq)]
pub struct Observed {
    pub value: ControlValue,
    pub at: Instant,
}

/// Last values seen for one control.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheEntry {
    /// Last value published to the display.
    pub from_store: Option<Observed>,
    /// Last value commanded by the display.
    pub from_transport: Option<Observed>,
}

#[derive(Debug, Default)]
pub struct ValueCache {
    entries: DashMap<ControlId, Arc<Mutex<CacheEntry>>>,
}

impl ValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &ControlId) -> Arc<Mutex<CacheEntry>> {
        if let Some(slot) = self.entries.get(id) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.entries.entry(id.clone()).or_default().value())
    }

    /// Record a value commanded by the display.
    pub fn record_inbound(&self, id: &ControlId, value: ControlValue) {
        let slot = self.slot(id);
        let mut entry = slot.lock().unwrap_or_else(PoisonError::into_inner);
        entry.from_transport = Some(Observed {
            value,
            at: Instant::now(),
        });
    }

    /// Record a value published to the display without any echo check.
    pub fn record_outbound(&self, id: &ControlId, value: ControlValue) {
        let slot = self.slot(id);
        let mut entry = slot.lock().unwrap_or_else(PoisonError::into_inner);
        entry.from_store = Some(Observed {
            value,
            at: Instant::now(),
        });
    }

    /// Decide whether `value` should be published for `id`.
    ///
    /// Returns `false` when `value` is the echo of a display command seen
    /// less than `window` ago and nothing has been published since that
    /// command. Otherwise records `value` as published and returns `true`.
    /// The check and the update happen under one lock.
    pub fn outbound_gate(&self, id: &ControlId, value: &ControlValue, window: Duration) -> bool {
        let slot = self.slot(id);
        let mut entry = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        if let Some(inbound) = &entry.from_transport {
            let superseded = entry
                .from_store
                .as_ref()
                .is_some_and(|published| published.at > inbound.at);
            if !superseded && inbound.value == *value && now.duration_since(inbound.at) < window {
                return false;
            }
        }

        entry.from_store = Some(Observed {
            value: value.clone(),
            at: now,
        });
        true
    }

    pub fn get(&self, id: &ControlId) -> Option<CacheEntry> {
        self.entries
            .get(id)
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// Drop entries for controls no longer present in `model`.
    pub fn prune(&self, model: &PanelModel) {
        self.entries.retain(|id, _| model.contains(id));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(1500);

    fn id() -> ControlId {
        ControlId::new("Gaming Setup", "Power")
    }

    #[tokio::test(start_paused = true)]
    async fn echo_inside_window_is_suppressed() {
        let cache = ValueCache::new();
        cache.record_inbound(&id(), ControlValue::Switch(false));

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(!cache.outbound_gate(&id(), &ControlValue::Switch(false), WINDOW));
        assert!(cache.get(&id()).unwrap().from_store.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn echo_after_window_is_published() {
        let cache = ValueCache::new();
        cache.record_inbound(&id(), ControlValue::Switch(false));

        tokio::time::advance(WINDOW).await;
        assert!(cache.outbound_gate(&id(), &ControlValue::Switch(false), WINDOW));
        assert_eq!(
            cache.get(&id()).unwrap().from_store.unwrap().value,
            ControlValue::Switch(false)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn different_value_is_published() {
        let cache = ValueCache::new();
        cache.record_inbound(&id(), ControlValue::Switch(false));
        assert!(cache.outbound_gate(&id(), &ControlValue::Switch(true), WINDOW));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_echo_stays_suppressed() {
        let cache = ValueCache::new();
        cache.record_inbound(&id(), ControlValue::Switch(true));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(!cache.outbound_gate(&id(), &ControlValue::Switch(true), WINDOW));
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(!cache.outbound_gate(&id(), &ControlValue::Switch(true), WINDOW));
    }

    #[tokio::test(start_paused = true)]
    async fn later_publish_ends_suppression() {
        let cache = ValueCache::new();
        cache.record_inbound(&id(), ControlValue::Switch(true));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(!cache.outbound_gate(&id(), &ControlValue::Switch(true), WINDOW));

        // An external change went out after the command...
        tokio::time::advance(Duration::from_millis(300)).await;
        assert!(cache.outbound_gate(&id(), &ControlValue::Switch(false), WINDOW));

        // ...so the commanded value coming back is a real change, not an echo.
        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(cache.outbound_gate(&id(), &ControlValue::Switch(true), WINDOW));
    }

    #[tokio::test]
    async fn prune_keeps_only_modelled_controls() {
        let cache = ValueCache::new();
        cache.record_outbound(&id(), ControlValue::Number(1.0));
        assert_eq!(cache.len(), 1);

        cache.prune(&PanelModel::empty("meshpanel"));
        assert!(cache.is_empty());
    }
}
