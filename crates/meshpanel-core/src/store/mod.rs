// ── State store adapter ──
//
// The engine's only view of the automation platform: read an entity,
// change an entity, watch entities for changes.

mod memory;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::warn;

use crate::codec::ControlValue;
use crate::error::CoreError;
use crate::model::{EntityRef, EntityState, StateChange};

pub use memory::MemoryStateStore;

/// Abstraction over the home-automation platform.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Current state of an entity, or [`CoreError::NotFound`].
    async fn get_value(&self, entity: &EntityRef) -> Result<EntityState, CoreError>;

    /// Change an entity. Fails with [`CoreError::Service`] or
    /// [`CoreError::NotFound`].
    async fn set_value(&self, entity: &EntityRef, value: &ControlValue) -> Result<(), CoreError>;

    /// Stream of changes for the given entity ids.
    fn subscribe_state_changes(&self, entities: BTreeSet<String>) -> StateSubscription;
}

/// A filtered subscription to state-store change events.
pub struct StateSubscription {
    receiver: broadcast::Receiver<Arc<StateChange>>,
    entities: BTreeSet<String>,
}

impl StateSubscription {
    pub fn new(receiver: broadcast::Receiver<Arc<StateChange>>, entities: BTreeSet<String>) -> Self {
        Self { receiver, entities }
    }

    pub fn entities(&self) -> &BTreeSet<String> {
        &self.entities
    }

    /// Wait for the next change to a watched entity.
    /// Returns `None` once the store has shut down.
    pub async fn recv(&mut self) -> Option<Arc<StateChange>> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if self.entities.contains(&change.entity_id) => return Some(change),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "state change subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
