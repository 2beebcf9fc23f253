// ── Panel domain model ──
//
// Panels, controls, entity references and the immutable `PanelModel`
// that maps between topics and entities.

pub mod control;
pub mod entity;
pub mod panel;

// ── Re-exports ──────────────────────────────────────────────────────

pub use control::{Control, ControlConfig, ControlId, ControlKind, ControlSpec, TopicBinding};
pub use entity::{EntityRef, EntityState, StateChange};
pub use panel::{Panel, PanelConfig, PanelModel};
