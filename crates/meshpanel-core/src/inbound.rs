// ── Inbound reconciler (display → state store) ──
//
// Runs on the transport receive loop and must never wait on the state
// store: decoding and cache bookkeeping happen inline, the command itself
// is spawned under the in-flight limit and the command timeout.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::codec::{self, ControlValue};
use crate::engine::EngineInner;
use crate::error::CoreError;
use crate::events::SyncEvent;
use crate::model::Control;
use crate::outbound;
use crate::transport::Message;

/// Handle a message on a control's command topic.
pub(crate) fn on_command(inner: &Arc<EngineInner>, control: Arc<Control>, message: &Message) {
    let value = match codec::decode(&control, &message.payload) {
        Ok(value) => value,
        Err(e) => {
            warn!(topic = %message.topic, control = %control.id, error = %e, "dropping command");
            inner.emit(SyncEvent::MappingFailed {
                topic: message.topic.clone(),
                reason: e.to_string(),
            });
            return;
        }
    };

    debug!(control = %control.id, %value, "command received");
    // Recorded before the command is issued so the store's echo is
    // recognized even if it arrives before `set_value` returns.
    inner.cache.record_inbound(&control.id, value.clone());

    let engine = Arc::clone(inner);
    inner.tracker.spawn(async move {
        apply(&engine, &control, value).await;
    });
}

/// Handle a message on a control's refresh topic. The read shares the
/// engine's read limit and timeout with discovery.
pub(crate) fn on_refresh(inner: &Arc<EngineInner>, control: Arc<Control>) {
    debug!(control = %control.id, "refresh requested");
    let engine = Arc::clone(inner);
    inner.tracker.spawn(async move {
        let result = engine.read(&control.entity).await;
        outbound::publish_snapshot_value(&engine, &control, result).await;
    });
}

async fn apply(inner: &EngineInner, control: &Control, value: ControlValue) {
    let Ok(_permit) = Arc::clone(&inner.commands).acquire_owned().await else {
        return;
    };

    let timeout = inner.config.command_timeout;
    let result = match tokio::time::timeout(timeout, inner.store.set_value(&control.entity, &value)).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::Timeout {
            entity: control.entity.entity_id().to_owned(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    };

    match result {
        Ok(()) => {
            debug!(control = %control.id, entity = %control.entity, %value, "command applied");
            inner.emit(SyncEvent::CommandApplied {
                control: control.id.clone(),
                entity: control.entity.entity_id().to_owned(),
                value,
            });
        }
        Err(e) => {
            warn!(control = %control.id, entity = %control.entity, error = %e, "command failed");
            inner.emit(SyncEvent::CommandFailed {
                control: control.id.clone(),
                entity: control.entity.entity_id().to_owned(),
                reason: e.to_string(),
            });
        }
    }
}
