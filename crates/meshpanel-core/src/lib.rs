// meshpanel-core: Bidirectional sync between a home-automation state store and MQTT-style display panels.

pub mod cache;
pub mod codec;
pub mod color;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod events;
pub mod model;
pub mod service;
pub mod store;
pub mod topic;
pub mod transport;

mod inbound;
mod outbound;

// ── Primary re-exports ──────────────────────────────────────────────
pub use codec::{ControlValue, UNAVAILABLE};
pub use config::SyncConfig;
pub use discovery::{Announce, DeviceStatus, DiscoveryPayload};
pub use engine::{ConnectionState, Engine, Notification};
pub use error::{CoreError, MappingError};
pub use events::SyncEvent;
pub use service::ServiceCall;
pub use store::{MemoryStateStore, StateStore, StateSubscription};
pub use topic::TopicScheme;
pub use transport::{MemoryBroker, MemoryTransport, Message, Transport, TransportEvent};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    Control, ControlConfig, ControlId, ControlKind, ControlSpec, EntityRef, EntityState, Panel,
    PanelConfig, PanelModel, StateChange, TopicBinding,
};
