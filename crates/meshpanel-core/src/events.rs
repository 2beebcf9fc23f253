// ── Observability sink ──
//
// Structured events broadcast by the engine alongside its tracing output.
// Consumers (tests, the CLI simulator) subscribe via `Engine::events()`.

use serde::Serialize;

use crate::codec::ControlValue;
use crate::model::ControlId;

/// Something the engine did or refused to do.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A device announced itself and received the full definition.
    DeviceSynced {
        device_id: String,
        degraded: Vec<ControlId>,
    },
    /// A retained state or definition message went out.
    Published { topic: String, payload: String },
    /// A state-store echo of a display command was not re-published.
    EchoSuppressed {
        control: ControlId,
        value: ControlValue,
    },
    /// A payload or entity state could not be mapped.
    MappingFailed { topic: String, reason: String },
    CommandApplied {
        control: ControlId,
        entity: String,
        value: ControlValue,
    },
    CommandFailed {
        control: ControlId,
        entity: String,
        reason: String,
    },
    /// A message arrived on a topic no control is bound to.
    UnknownTopic { topic: String },
    /// A bound entity does not exist in the state store.
    EntityMissing { control: ControlId, entity: String },
    Reconfigured { panels: usize, controls: usize },
}
