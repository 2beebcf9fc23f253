// ── Service-call vocabulary ──
//
// Translates a decoded control value into the automation platform's
// domain/service/data triple. State-store adapters backed by a real
// platform dispatch these; the in-memory store applies them directly.

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::codec::ControlValue;
use crate::model::{EntityRef, EntityState};

/// A platform service invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub data: Map<String, Value>,
}

impl ServiceCall {
    fn new(domain: &str, service: &str, entity: &EntityRef) -> Self {
        let mut data = Map::new();
        data.insert("entity_id".into(), Value::from(entity.entity_id()));
        Self {
            domain: domain.to_owned(),
            service: service.to_owned(),
            data,
        }
    }

    fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_owned(), value.into());
        self
    }

    /// Build the call that sets `entity` to `value`.
    ///
    /// `current` is the entity's present state; partial color updates
    /// (hue only, saturation only, ...) keep the other component.
    pub fn for_value(entity: &EntityRef, value: &ControlValue, current: Option<&EntityState>) -> Self {
        let domain = entity.domain();

        match value {
            ControlValue::Switch(on) => {
                let service = if *on { "turn_on" } else { "turn_off" };
                Self::new(domain, service, entity)
            }
            ControlValue::Number(n) => Self::numeric(entity, *n, current),
            ControlValue::Choice(option) => match domain {
                "media_player" => Self::new(domain, "select_source", entity).with("source", option.as_str()),
                _ => Self::new(domain, "select_option", entity).with("option", option.as_str()),
            },
            ControlValue::Color(rgb) => {
                Self::new(domain, "turn_on", entity).with("rgb_color", json!(rgb.to_array()))
            }
        }
    }

    fn numeric(entity: &EntityRef, n: f64, current: Option<&EntityState>) -> Self {
        let domain = entity.domain();
        let pair = |key: &str, fallback: [f64; 2]| -> [f64; 2] {
            current
                .and_then(|s| s.attribute(key))
                .and_then(Value::as_array)
                .and_then(|a| Some([a.first()?.as_f64()?, a.get(1)?.as_f64()?]))
                .unwrap_or(fallback)
        };

        match (domain, entity.attribute()) {
            ("light", Some("hs_hue")) => {
                let [_, s] = pair("hs_color", [0.0, 100.0]);
                Self::new(domain, "turn_on", entity).with("hs_color", json!([n, s]))
            }
            ("light", Some("hs_saturation")) => {
                let [h, _] = pair("hs_color", [0.0, 100.0]);
                Self::new(domain, "turn_on", entity).with("hs_color", json!([h, n]))
            }
            ("light", Some("xy_x")) => {
                let [_, y] = pair("xy_color", [0.5, 0.5]);
                Self::new(domain, "turn_on", entity).with("xy_color", json!([n / 1000.0, y]))
            }
            ("light", Some("xy_y")) => {
                let [x, _] = pair("xy_color", [0.5, 0.5]);
                Self::new(domain, "turn_on", entity).with("xy_color", json!([x, n / 1000.0]))
            }
            ("light", Some(attr)) => Self::new(domain, "turn_on", entity).with(attr, integral(n)),
            ("light", None) => Self::new(domain, "turn_on", entity).with("brightness", integral(n)),
            ("climate", _) => Self::new(domain, "set_temperature", entity).with("temperature", n),
            ("fan", _) => Self::new(domain, "set_percentage", entity).with("percentage", integral(n)),
            ("media_player", _) => {
                Self::new(domain, "volume_set", entity).with("volume_level", n / 100.0)
            }
            _ => Self::new(domain, "set_value", entity).with("value", n),
        }
    }
}

/// Whole numbers travel as JSON integers.
fn integral(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
        let whole = n as i64;
        Value::from(whole)
    } else {
        Value::from(n)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::color::Rgb;

    fn entity(raw: &str) -> EntityRef {
        raw.parse().unwrap()
    }

    #[test]
    fn switch_maps_to_turn_on_off() {
        let call = ServiceCall::for_value(&entity("light.gaming_pc"), &ControlValue::Switch(false), None);
        assert_eq!(call.domain, "light");
        assert_eq!(call.service, "turn_off");
        assert_eq!(call.data["entity_id"], "light.gaming_pc");
    }

    #[test]
    fn slider_maps_per_domain() {
        let light = ServiceCall::for_value(&entity("light.desk"), &ControlValue::Number(128.0), None);
        assert_eq!(light.service, "turn_on");
        assert_eq!(light.data["brightness"], 128);

        let climate = ServiceCall::for_value(&entity("climate.office"), &ControlValue::Number(21.5), None);
        assert_eq!(climate.service, "set_temperature");
        assert_eq!(climate.data["temperature"], 21.5);

        let volume = ServiceCall::for_value(&entity("media_player.tv"), &ControlValue::Number(40.0), None);
        assert_eq!(volume.service, "volume_set");
        assert_eq!(volume.data["volume_level"], 0.4);

        let other = ServiceCall::for_value(&entity("input_number.level"), &ControlValue::Number(3.0), None);
        assert_eq!(other.service, "set_value");
    }

    #[test]
    fn hue_slider_keeps_current_saturation() {
        let current = EntityState::new("on").with_attribute("hs_color", json!([10.0, 55.0]));
        let call = ServiceCall::for_value(
            &entity("light.desk (hs_hue)"),
            &ControlValue::Number(200.0),
            Some(&current),
        );
        assert_eq!(call.data["hs_color"], json!([200.0, 55.0]));
    }

    #[test]
    fn select_and_color() {
        let source = ServiceCall::for_value(
            &entity("media_player.tv"),
            &ControlValue::Choice("HDMI 1".into()),
            None,
        );
        assert_eq!(source.service, "select_source");
        assert_eq!(source.data["source"], "HDMI 1");

        let color = ServiceCall::for_value(
            &entity("light.desk"),
            &ControlValue::Color(Rgb::new(1, 2, 3)),
            None,
        );
        assert_eq!(color.data["rgb_color"], json!([1, 2, 3]));
    }
}
