//! `meshpanel simulate`: run the engine against in-memory adapters.
//!
//! A simulated device announces itself, optional display commands and
//! entity changes are injected, and every message that crossed the broker
//! is printed afterwards.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tabled::Tabled;
use tracing::info;

use meshpanel_core::{
    Announce, Control, ControlId, ControlSpec, Engine, EntityState, MemoryBroker,
    MemoryStateStore, Message, PanelModel, Transport,
};

use crate::cli::{GlobalOpts, SimulateArgs};
use crate::error::CliError;
use crate::output;

const SETTLE_MARGIN: Duration = Duration::from_millis(200);

#[derive(Serialize)]
struct TrafficEntry {
    topic: String,
    payload: String,
    retained: bool,
}

#[derive(Tabled)]
struct TrafficRow {
    #[tabled(rename = "Topic")]
    topic: String,
    #[tabled(rename = "Payload")]
    payload: String,
    #[tabled(rename = "Retained")]
    retained: String,
}

pub async fn handle(args: SimulateArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let loaded = super::load(global)?;

    // Parse injections up front so bad input never starts the engine.
    let commands = args
        .commands
        .iter()
        .map(|raw| parse_command(&loaded.model, raw))
        .collect::<Result<Vec<_>, _>>()?;
    let changes = args
        .changes
        .iter()
        .map(String::as_str)
        .map(parse_change)
        .collect::<Result<Vec<_>, _>>()?;

    let store = Arc::new(MemoryStateStore::new());
    seed(&store, &loaded.model);

    let broker = MemoryBroker::new();
    let device = broker.client();
    let settle = loaded.sync.debounce + SETTLE_MARGIN;

    let engine = Engine::new(
        loaded.sync.clone(),
        &loaded.config.panels,
        Arc::new(broker.client()),
        Arc::clone(&store) as _,
    )?;
    let mut events = engine.events();
    engine.start().await?;

    let mut announce = Announce::new(&args.device_id);
    announce.capabilities = args.capabilities;
    device
        .publish(Message::new(
            loaded.model.topics().announce(),
            serde_json::to_vec(&announce)?,
        ))
        .await?;
    tokio::time::sleep(settle).await;

    for (topic, payload) in commands {
        device.publish(Message::new(topic, payload)).await?;
    }
    for (entity_id, state) in changes {
        let mut current = store.get(&entity_id).unwrap_or_default();
        current.state = state;
        store.insert(entity_id, current);
    }
    tokio::time::sleep(settle).await;
    engine.shutdown().await;

    while let Ok(event) = events.try_recv() {
        info!(event = %serde_json::to_string(&event)?, "sync event");
    }

    let color = output::should_color(global.color);
    let traffic: Vec<TrafficEntry> = broker
        .published()
        .into_iter()
        .map(|m| TrafficEntry {
            payload: m.payload_str().unwrap_or("<binary>").to_owned(),
            topic: m.topic,
            retained: m.retain,
        })
        .collect();

    let rendered = output::render_list(
        global.output,
        &traffic,
        |t| TrafficRow {
            topic: t.topic.clone(),
            payload: truncate(&t.payload, 60),
            retained: output::dim(if t.retained { "yes" } else { "no" }, color),
        },
        |t| format!("{} {}", t.topic, t.payload),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}

// ── Input parsing ────────────────────────────────────────────────────

/// `PANEL/CONTROL=PAYLOAD` -> (command topic, payload)
fn parse_command(model: &PanelModel, raw: &str) -> Result<(String, String), CliError> {
    let invalid = |reason: &str| CliError::Validation {
        field: "--set".into(),
        reason: format!("{reason}: {raw}"),
    };

    let (target, payload) = raw
        .split_once('=')
        .ok_or_else(|| invalid("expected PANEL/CONTROL=PAYLOAD"))?;
    let (panel, label) = target
        .split_once('/')
        .ok_or_else(|| invalid("expected PANEL/CONTROL=PAYLOAD"))?;
    let control = model
        .control(&ControlId::new(panel, label))
        .ok_or_else(|| invalid("no such control"))?;

    Ok((control.binding.command.clone(), payload.to_owned()))
}

/// `ENTITY=STATE` -> (entity id, state)
fn parse_change(raw: &str) -> Result<(String, String), CliError> {
    match raw.split_once('=') {
        Some((entity, state)) if !entity.trim().is_empty() => {
            Ok((entity.trim().to_owned(), state.to_owned()))
        }
        _ => Err(CliError::Validation {
            field: "--change".into(),
            reason: format!("expected ENTITY=STATE: {raw}"),
        }),
    }
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_owned()
    } else {
        let head: String = value.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}

// ── Seeding ──────────────────────────────────────────────────────────

/// Give every bound entity a plausible starting state.
fn seed(store: &MemoryStateStore, model: &PanelModel) {
    for panel in model.panels() {
        if let Some(entity) = &panel.state_entity {
            let state = store
                .get(entity.entity_id())
                .unwrap_or_else(|| EntityState::new("on"));
            store.insert(entity.entity_id(), state);
        }
    }
    for control in model.all_controls() {
        let current = store
            .get(control.entity.entity_id())
            .unwrap_or_else(|| EntityState::new("on"));
        store.insert(control.entity.entity_id(), seed_control(control, current));
    }
}

fn seed_control(control: &Control, state: EntityState) -> EntityState {
    let entity = &control.entity;
    match &control.spec {
        ControlSpec::Switch => state,
        ControlSpec::Color => state.with_attribute("rgb_color", json!([255, 255, 255])),
        ControlSpec::Slider { min, max, .. } => {
            let mid = min + (max - min) / 2.0;
            match (entity.attribute(), entity.domain()) {
                (Some("hs_hue" | "hs_saturation"), _) => {
                    state.with_attribute("hs_color", json!([mid, mid]))
                }
                (Some("xy_x" | "xy_y"), _) => {
                    state.with_attribute("xy_color", json!([mid / 1000.0, mid / 1000.0]))
                }
                (Some(attr), _) => state.with_attribute(attr, mid),
                (None, "light") => state.with_attribute("brightness", mid),
                (None, "fan") => state.with_attribute("percentage", mid),
                (None, "climate") => state.with_attribute("temperature", mid),
                (None, "media_player") => state.with_attribute("volume_level", mid / 100.0),
                (None, _) => EntityState {
                    state: mid.to_string(),
                    ..state
                },
            }
        }
        ControlSpec::Select { options, .. } => {
            let Some(first) = options.first() else {
                return state;
            };
            match (entity.attribute(), entity.domain()) {
                (Some(attr), _) => state.with_attribute(attr, first.as_str()),
                (None, "media_player") => state.with_attribute("source", first.as_str()),
                (None, _) => EntityState {
                    state: first.clone(),
                    ..state
                },
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use meshpanel_core::PanelConfig;

    use super::*;

    fn model() -> PanelModel {
        let panels: Vec<PanelConfig> = serde_json::from_value(json!([{
            "name": "Office",
            "controls": [
                { "label": "Temp", "entity": "climate.office", "type": "slider", "min": 16, "max": 30 },
                { "label": "Mode", "entity": "input_select.office_mode", "type": "select",
                  "options": ["Eco", "Comfort"] }
            ]
        }]))
        .unwrap();
        PanelModel::build("mp", &panels).unwrap()
    }

    #[test]
    fn command_argument_resolves_to_the_command_topic() {
        let (topic, payload) = parse_command(&model(), "Office/Temp=21").unwrap();
        assert_eq!(topic, "mp/Office/Temp/set");
        assert_eq!(payload, "21");
    }

    #[test]
    fn unknown_control_is_rejected() {
        let err = parse_command(&model(), "Office/Fan=on").unwrap_err();
        assert!(matches!(err, CliError::Validation { .. }));
        assert!(parse_command(&model(), "Office-Temp").is_err());
    }

    #[test]
    fn change_argument_requires_an_entity() {
        assert_eq!(
            parse_change("light.desk=off").unwrap(),
            ("light.desk".to_owned(), "off".to_owned())
        );
        assert!(parse_change("=off").is_err());
        assert!(parse_change("light.desk").is_err());
    }

    #[test]
    fn seeded_states_encode_for_every_control() {
        let model = model();
        let store = MemoryStateStore::new();
        seed(&store, &model);

        let temp = store.get("climate.office").unwrap();
        assert_eq!(temp.attribute("temperature"), Some(&json!(23.0)));
        let mode = store.get("input_select.office_mode").unwrap();
        assert_eq!(mode.state, "Eco");
    }
}
