// ── Discovery handler ──
//
// A device announces itself; the engine answers with the full panel
// definition and a snapshot of every control's current value, all
// retained. Re-announcing repeats the handshake; unchanged inputs yield
// byte-identical payloads.

use std::collections::BTreeSet;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::StreamExt;
use futures_util::stream;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};

use crate::codec::UNAVAILABLE;
use crate::engine::EngineInner;
use crate::error::{CoreError, MappingError};
use crate::events::SyncEvent;
use crate::model::{ControlId, ControlKind, ControlSpec, PanelModel};
use crate::outbound;
use crate::transport::Message;

// ── Announce ────────────────────────────────────────────────────────

/// A device's self-description, sent on the announce topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announce {
    #[serde(alias = "panel_id")]
    pub device_id: String,
    /// Control kinds the device can render. Absent means all of them.
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    #[serde(default)]
    pub firmware: Option<String>,
}

impl Announce {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            capabilities: None,
            firmware: None,
        }
    }

    /// Parse an announce payload: a JSON object, or a bare device id.
    pub fn parse(payload: &[u8]) -> Result<Self, MappingError> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| MappingError::NotUtf8)?
            .trim();
        let malformed = || MappingError::Malformed {
            kind: "announce",
            payload: text.to_owned(),
        };

        let announce = if text.starts_with('{') {
            serde_json::from_str::<Self>(text).map_err(|_| malformed())?
        } else {
            Self::new(text)
        };

        if announce.device_id.trim().is_empty() {
            return Err(malformed());
        }
        Ok(announce)
    }

    /// Announced capabilities. Unrecognized kinds are ignored.
    pub fn capabilities(&self) -> BTreeSet<ControlKind> {
        match &self.capabilities {
            None => ControlKind::iter().collect(),
            Some(list) => list
                .iter()
                .filter_map(|raw| raw.trim().to_ascii_lowercase().parse().ok())
                .collect(),
        }
    }
}

/// Controls whose kind the device cannot render, in render order.
pub fn degraded_controls(model: &PanelModel, capabilities: &BTreeSet<ControlKind>) -> Vec<ControlId> {
    model
        .all_controls()
        .iter()
        .filter(|c| !capabilities.contains(&c.kind()))
        .map(|c| c.id.clone())
        .collect()
}

// ── Discovery payload ───────────────────────────────────────────────

/// The full panel definition published on the discovery config topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryPayload {
    pub base: String,
    pub panels: Vec<PanelDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_topic: Option<String>,
    pub controls: Vec<ControlDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlDefinition {
    pub label: String,
    pub entity: String,
    #[serde(flatten)]
    pub spec: ControlSpec,
    pub command_topic: String,
    pub state_topic: String,
    pub refresh_topic: String,
    /// `false` when the device lacks the capability to render this kind.
    pub interactive: bool,
}

impl DiscoveryPayload {
    pub fn build(model: &PanelModel, degraded: &[ControlId]) -> Self {
        let panels = model
            .panels()
            .iter()
            .map(|panel| PanelDefinition {
                name: panel.name.clone(),
                icon: panel.icon.clone(),
                state_topic: panel.state_topic.clone(),
                controls: panel
                    .controls
                    .iter()
                    .map(|c| ControlDefinition {
                        label: c.id.label.clone(),
                        entity: c.entity.to_string(),
                        spec: c.spec.clone(),
                        command_topic: c.binding.command.clone(),
                        state_topic: c.binding.state.clone(),
                        refresh_topic: c.binding.refresh.clone(),
                        interactive: !degraded.contains(&c.id),
                    })
                    .collect(),
            })
            .collect();

        Self {
            base: model.topics().base().to_owned(),
            panels,
        }
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string(self)
            .map_err(|e| CoreError::Internal(format!("discovery payload encoding failed: {e}")))
    }
}

// ── Device registry ─────────────────────────────────────────────────

/// What the engine knows about one announced device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub device_id: String,
    pub firmware: Option<String>,
    pub capabilities: BTreeSet<ControlKind>,
    pub degraded: Vec<ControlId>,
    pub announced_at: DateTime<Utc>,
    /// Set once the definition and snapshot have been published.
    pub synced_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    announce: Announce,
    #[serde(skip)]
    sequence: u64,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: DashMap<String, DeviceStatus>,
    sequence: AtomicU64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_announce(&self, announce: &Announce, degraded: Vec<ControlId>) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let status = DeviceStatus {
            device_id: announce.device_id.clone(),
            firmware: announce.firmware.clone(),
            capabilities: announce.capabilities(),
            degraded,
            announced_at: Utc::now(),
            synced_at: None,
            announce: announce.clone(),
            sequence,
        };
        self.devices.insert(announce.device_id.clone(), status);
    }

    pub(crate) fn mark_synced(&self, device_id: &str) {
        if let Some(mut status) = self.devices.get_mut(device_id) {
            status.synced_at = Some(Utc::now());
        }
    }

    /// The most recently announced device's announcement.
    pub(crate) fn latest(&self) -> Option<Announce> {
        self.devices
            .iter()
            .max_by_key(|s| s.sequence)
            .map(|s| s.announce.clone())
    }

    /// Every known device, sorted by id.
    pub fn snapshot(&self) -> Vec<DeviceStatus> {
        let mut devices: Vec<DeviceStatus> = self.devices.iter().map(|s| s.value().clone()).collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        devices
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceStatus> {
        self.devices.get(device_id).map(|s| s.value().clone())
    }
}

// ── Handshake ───────────────────────────────────────────────────────

/// Publish the definition and state snapshot.
///
/// Without an announcement (connect-time publish, resync with no known
/// device) every control is interactive.
pub(crate) async fn run(inner: &Arc<EngineInner>, announce: Option<&Announce>) {
    let _serial = inner.discovery_lock.lock().await;
    let model = inner.model.load_full();

    let degraded = match announce {
        Some(a) => {
            let degraded = degraded_controls(&model, &a.capabilities());
            if !degraded.is_empty() {
                warn!(
                    device_id = %a.device_id,
                    degraded = degraded.len(),
                    "device lacks capabilities, controls published read-only"
                );
            }
            inner.registry.record_announce(a, degraded.clone());
            degraded
        }
        None => Vec::new(),
    };

    let payload = match DiscoveryPayload::build(&model, &degraded).to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "discovery aborted");
            return;
        }
    };
    inner
        .publish(Message::retained(model.topics().discovery_config(), payload))
        .await;

    publish_snapshot(inner, &model).await;

    if let Some(a) = announce {
        inner.registry.mark_synced(&a.device_id);
        info!(device_id = %a.device_id, controls = model.all_controls().len(), "device synced");
        inner.emit(SyncEvent::DeviceSynced {
            device_id: a.device_id.clone(),
            degraded,
        });
    }
}

/// Read every control (bounded concurrency) and publish in render order,
/// then every panel summary.
async fn publish_snapshot(inner: &Arc<EngineInner>, model: &PanelModel) {
    let limit = inner.config.max_in_flight.max(1);

    let reads = stream::iter(model.all_controls().iter().cloned())
        .map(|control| async move {
            let result = inner.read(&control.entity).await;
            (control, result)
        })
        .buffered(limit);
    let mut reads = pin!(reads);
    while let Some((control, result)) = reads.next().await {
        outbound::publish_snapshot_value(inner, &control, result).await;
    }

    for panel in model.panels() {
        let (Some(entity), Some(topic)) = (&panel.state_entity, &panel.state_topic) else {
            continue;
        };
        let payload = match inner.read(entity).await {
            Ok(state) => state.state,
            Err(e) if e.is_not_found() || e.is_timeout() => {
                warn!(panel = %panel.name, entity = %entity, error = %e, "summary entity unavailable");
                UNAVAILABLE.to_owned()
            }
            Err(e) => {
                warn!(panel = %panel.name, error = %e, "summary read failed");
                continue;
            }
        };
        inner.publish(Message::retained(topic.clone(), payload)).await;
    }
    debug!(controls = model.all_controls().len(), "state snapshot published");
}
