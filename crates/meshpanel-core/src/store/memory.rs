// ── In-memory state store ──
//
// A self-contained automation platform: entities live in a `DashMap`,
// service calls are applied with platform semantics and every mutation
// is broadcast to subscribers. Used by tests and the CLI simulator.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use super::{StateStore, StateSubscription};
use crate::codec::ControlValue;
use crate::error::CoreError;
use crate::model::{EntityRef, EntityState, StateChange};
use crate::service::ServiceCall;

const CHANGE_CHANNEL_SIZE: usize = 1024;

const COLOR_ATTRIBUTES: &[&str] = &["rgb_color", "hs_color", "xy_color", "rgbw_color", "rgbww_color"];

/// DashMap-backed [`StateStore`] with failure and latency injection.
pub struct MemoryStateStore {
    entities: DashMap<String, EntityState>,
    changes: broadcast::Sender<Arc<StateChange>>,
    calls: Mutex<Vec<ServiceCall>>,
    failing: DashMap<String, String>,
    latency: Mutex<Duration>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_SIZE);
        Self {
            entities: DashMap::new(),
            changes,
            calls: Mutex::new(Vec::new()),
            failing: DashMap::new(),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    /// Set an entity's state as if it changed outside the engine.
    pub fn insert(&self, entity_id: impl Into<String>, state: EntityState) {
        let entity_id = entity_id.into();
        self.entities.insert(entity_id.clone(), state.clone());
        self.emit(entity_id, state);
    }

    /// Remove an entity entirely (subsequent reads return `NotFound`).
    pub fn remove(&self, entity_id: &str) -> Option<EntityState> {
        self.entities.remove(entity_id).map(|(_, state)| state)
    }

    pub fn get(&self, entity_id: &str) -> Option<EntityState> {
        self.entities.get(entity_id).map(|r| r.value().clone())
    }

    /// Every service call applied (or attempted) so far, oldest first.
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make every command for `entity_id` fail with a service error.
    pub fn fail_commands(&self, entity_id: impl Into<String>, message: impl Into<String>) {
        self.failing.insert(entity_id.into(), message.into());
    }

    pub fn clear_failures(&self) {
        self.failing.clear();
    }

    /// Delay every command by `latency` before it is applied.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    fn emit(&self, entity_id: String, new_state: EntityState) {
        // No subscribers yet is fine.
        let _ = self.changes.send(Arc::new(StateChange {
            entity_id,
            new_state,
        }));
    }

    /// Apply a service call with the platform's semantics.
    fn apply(&self, call: &ServiceCall) -> Result<EntityState, CoreError> {
        let Some(entity_id) = call.data.get("entity_id").and_then(Value::as_str) else {
            return Err(CoreError::Internal("service call without entity_id".into()));
        };
        let mut entry = self
            .entities
            .get_mut(entity_id)
            .ok_or_else(|| CoreError::NotFound {
                entity: entity_id.to_owned(),
            })?;
        let state = entry.value_mut();
        let args = call.data.iter().filter(|(k, _)| k.as_str() != "entity_id");

        match call.service.as_str() {
            "turn_on" => {
                state.state = "on".into();
                for (key, value) in args {
                    if COLOR_ATTRIBUTES.contains(&key.as_str()) {
                        for color in COLOR_ATTRIBUTES {
                            state.attributes.remove(*color);
                        }
                    }
                    state.attributes.insert(key.clone(), value.clone());
                }
            }
            "turn_off" => {
                state.state = "off".into();
                state.attributes.remove("brightness");
            }
            "set_percentage" => {
                let pct = call.data.get("percentage").and_then(Value::as_f64).unwrap_or(0.0);
                state.state = if pct > 0.0 { "on" } else { "off" }.into();
                state.attributes.insert("percentage".into(), Value::from(pct));
            }
            "select_option" | "set_value" => {
                let value = call
                    .data
                    .get("option")
                    .or_else(|| call.data.get("value"))
                    .cloned()
                    .unwrap_or(Value::Null);
                state.state = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
            }
            _ => {
                for (key, value) in args {
                    state.attributes.insert(key.clone(), value.clone());
                }
            }
        }

        Ok(state.clone())
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_value(&self, entity: &EntityRef) -> Result<EntityState, CoreError> {
        self.get(entity.entity_id()).ok_or_else(|| CoreError::NotFound {
            entity: entity.entity_id().to_owned(),
        })
    }

    async fn set_value(&self, entity: &EntityRef, value: &ControlValue) -> Result<(), CoreError> {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let current = self.get(entity.entity_id());
        let call = ServiceCall::for_value(entity, value, current.as_ref());
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call.clone());

        if let Some(message) = self.failing.get(entity.entity_id()) {
            return Err(CoreError::service(entity.entity_id(), message.value().clone()));
        }

        let new_state = self.apply(&call)?;
        debug!(entity = %entity, service = %call.service, "applied service call");
        self.emit(entity.entity_id().to_owned(), new_state);
        Ok(())
    }

    fn subscribe_state_changes(&self, entities: BTreeSet<String>) -> StateSubscription {
        StateSubscription::new(self.changes.subscribe(), entities)
    }
}
