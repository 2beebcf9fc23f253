// ── Control value codec ──
//
// Two directions per control kind:
//   encode: state-store `EntityState` → `ControlValue` → wire payload
//   decode: wire payload → `ControlValue` (validated against the control)
//
// For every value inside a control's domain, `decode(payload(v)) == v`.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::color::Rgb;
use crate::error::MappingError;
use crate::model::{Control, ControlSpec, EntityState};

/// Payload published on a state topic when the entity cannot be read.
pub const UNAVAILABLE: &str = "unavailable";

/// A value in a control's domain.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ControlValue {
    Switch(bool),
    Number(f64),
    Choice(String),
    Color(Rgb),
}

impl ControlValue {
    /// Wire representation published on state topics.
    pub fn to_payload(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ControlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Switch(true) => f.write_str("on"),
            Self::Switch(false) => f.write_str("off"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Choice(option) => f.write_str(option),
            Self::Color(rgb) => write!(f, "{rgb}"),
        }
    }
}

// ── Encode (state store → display) ──────────────────────────────────

/// Map an entity state to the control's value.
///
/// `Ok(None)` means there is nothing meaningful to render (the entity is
/// unavailable, or a lenient select saw a value outside its options).
pub fn encode(control: &Control, state: &EntityState) -> Result<Option<ControlValue>, MappingError> {
    if is_unavailable(state) {
        return Ok(None);
    }

    match &control.spec {
        ControlSpec::Switch => Ok(Some(ControlValue::Switch(is_active(&state.state)))),
        ControlSpec::Slider { min, max, step } => {
            let raw = slider_reading(control, state)?;
            Ok(Some(ControlValue::Number(snap(raw, *min, *max, *step))))
        }
        ControlSpec::Select { options, strict } => {
            let current = select_reading(control, state);
            if options.iter().any(|o| o == current) {
                Ok(Some(ControlValue::Choice(current.to_owned())))
            } else if *strict {
                Err(MappingError::UnknownOption {
                    value: current.to_owned(),
                })
            } else {
                Ok(None)
            }
        }
        ControlSpec::Color => Ok(Some(ControlValue::Color(color_reading(state)))),
    }
}

/// The platform has no usable value for the entity.
pub fn is_unavailable(state: &EntityState) -> bool {
    matches!(state.state.as_str(), UNAVAILABLE | "unknown")
}

fn is_active(state: &str) -> bool {
    matches!(
        state,
        "on" | "open" | "opening" | "playing" | "home" | "heat" | "cool" | "auto" | "true"
    )
}

/// Media players select their input source; everything else its state.
fn select_reading<'a>(control: &Control, state: &'a EntityState) -> &'a str {
    let attribute = match (control.entity.attribute(), control.entity.domain()) {
        (Some(attr), _) => Some(attr),
        (None, "media_player") => Some("source"),
        (None, _) => None,
    };
    attribute
        .and_then(|attr| state.attribute(attr))
        .and_then(Value::as_str)
        .unwrap_or(&state.state)
}

// ── Slider grid ─────────────────────────────────────────────────────

/// Decimal places kept on slider values; scaled platform readings such as
/// `0.29 * 100.0` otherwise carry binary rounding noise.
const SLIDER_PRECISION: f64 = 1e9;

/// Tolerance, in steps, for a commanded value to count as on the grid.
const STEP_TOLERANCE: f64 = 1e-6;

fn tidy(value: f64) -> f64 {
    (value * SLIDER_PRECISION).round() / SLIDER_PRECISION
}

/// Clamp `raw` into `[min, max]` and snap it to the nearest step from `min`.
fn snap(raw: f64, min: f64, max: f64, step: f64) -> f64 {
    let steps = ((raw.clamp(min, max) - min) / step).round();
    tidy(min + steps * step).clamp(min, max)
}

fn on_grid(value: f64, min: f64, max: f64, step: f64) -> bool {
    let steps = (value - min) / step;
    value >= max || (steps - steps.round()).abs() < STEP_TOLERANCE
}

/// Read the numeric value a slider tracks.
fn slider_reading(control: &Control, state: &EntityState) -> Result<f64, MappingError> {
    let entity = &control.entity;

    let reading = match (entity.attribute(), entity.domain()) {
        (Some("hs_hue"), _) => pair_component(state.attribute("hs_color"), 0, 1.0),
        (Some("hs_saturation"), _) => pair_component(state.attribute("hs_color"), 1, 1.0),
        (Some("xy_x"), _) => pair_component(state.attribute("xy_color"), 0, 1000.0),
        (Some("xy_y"), _) => pair_component(state.attribute("xy_color"), 1, 1000.0),
        (Some(attr), _) => state.attribute(attr).and_then(numeric),
        // An off light reports no brightness at all.
        (None, "light") => Some(state.attribute("brightness").and_then(numeric).unwrap_or(0.0)),
        (None, "fan") => state.attribute("percentage").and_then(numeric),
        (None, "climate") => state.attribute("temperature").and_then(numeric),
        (None, "media_player") => state
            .attribute("volume_level")
            .and_then(numeric)
            .map(|v| v * 100.0),
        (None, _) => numeric_str(&state.state),
    };

    reading
        .filter(|v| v.is_finite())
        .ok_or_else(|| MappingError::NotNumeric {
            state: state.state.clone(),
        })
}

fn pair_component(value: Option<&Value>, index: usize, scale: f64) -> Option<f64> {
    value
        .and_then(Value::as_array)
        .and_then(|pair| pair.get(index))
        .and_then(numeric)
        .map(|v| v * scale)
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => numeric_str(s),
        _ => None,
    }
}

fn numeric_str(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok()
}

/// Extract an sRGB color, preferring direct RGB over converted forms.
/// Entities that are not on render black.
fn color_reading(state: &EntityState) -> Rgb {
    if !state.is_on() {
        return Rgb::BLACK;
    }

    let direct = ["rgb_color", "rgbww_color", "rgbw_color"]
        .iter()
        .find_map(|key| state.attribute(key).and_then(Rgb::from_json_channels));
    if let Some(rgb) = direct {
        return rgb;
    }

    if let Some((h, s)) = pair(state.attribute("hs_color")) {
        return Rgb::from_hs(h, s);
    }
    if let Some((x, y)) = pair(state.attribute("xy_color")) {
        return Rgb::from_xy(x, y);
    }
    Rgb::BLACK
}

fn pair(value: Option<&Value>) -> Option<(f64, f64)> {
    Some((pair_component(value, 0, 1.0)?, pair_component(value, 1, 1.0)?))
}

// ── Decode (display → state store) ──────────────────────────────────

/// Parse and validate a command payload for the control.
pub fn decode(control: &Control, payload: &[u8]) -> Result<ControlValue, MappingError> {
    let text = std::str::from_utf8(payload).map_err(|_| MappingError::NotUtf8)?;
    let text = text.trim();
    let malformed = |kind: &'static str| MappingError::Malformed {
        kind,
        payload: text.to_owned(),
    };

    match &control.spec {
        ControlSpec::Switch => match text.to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => Ok(ControlValue::Switch(true)),
            "off" | "false" | "0" => Ok(ControlValue::Switch(false)),
            _ => Err(malformed("switch")),
        },
        ControlSpec::Slider { min, max, step } => {
            let value = text
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| malformed("slider"))?;
            if value < *min || value > *max {
                return Err(MappingError::OutOfRange {
                    value,
                    min: *min,
                    max: *max,
                });
            }
            if !on_grid(value, *min, *max, *step) {
                return Err(MappingError::OffStep {
                    value,
                    min: *min,
                    step: *step,
                });
            }
            Ok(ControlValue::Number(tidy(value)))
        }
        ControlSpec::Select { options, .. } => options
            .iter()
            .find(|o| o.as_str() == text)
            .map(|o| ControlValue::Choice(o.clone()))
            .ok_or_else(|| MappingError::UnknownOption {
                value: text.to_owned(),
            }),
        ControlSpec::Color => text.parse::<Rgb>().map(ControlValue::Color),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::{ControlId, EntityRef, TopicBinding};

    fn control(entity: &str, spec: ControlSpec) -> Control {
        Control {
            id: ControlId::new("Panel", "Control"),
            entity: entity.parse::<EntityRef>().unwrap(),
            spec,
            binding: TopicBinding {
                command: "b/Panel/Control/set".into(),
                state: "b/Panel/Control/state".into(),
                refresh: "b/Panel/Control/get".into(),
            },
        }
    }

    fn temp_slider() -> Control {
        control(
            "climate.office",
            ControlSpec::Slider {
                min: 16.0,
                max: 30.0,
                step: 1.0,
            },
        )
    }

    fn select(strict: bool) -> Control {
        control(
            "input_select.mode",
            ControlSpec::Select {
                options: vec!["Eco".into(), "Comfort".into(), "Boost mode".into()],
                strict,
            },
        )
    }

    #[test]
    fn payloads_decode_back_to_their_values() {
        let cases = [
            (control("switch.fan", ControlSpec::Switch), ControlValue::Switch(true)),
            (control("switch.fan", ControlSpec::Switch), ControlValue::Switch(false)),
            (temp_slider(), ControlValue::Number(16.0)),
            (temp_slider(), ControlValue::Number(21.0)),
            (temp_slider(), ControlValue::Number(30.0)),
            (select(false), ControlValue::Choice("Boost mode".into())),
            (control("light.desk", ControlSpec::Color), ControlValue::Color(Rgb::new(0, 128, 255))),
        ];
        for (control, value) in cases {
            let payload = value.to_payload();
            assert_eq!(decode(&control, payload.as_bytes()).unwrap(), value, "{payload}");
        }
    }

    #[test]
    fn slider_rejects_out_of_range_commands() {
        let err = decode(&temp_slider(), b"45").unwrap_err();
        assert_eq!(
            err,
            MappingError::OutOfRange {
                value: 45.0,
                min: 16.0,
                max: 30.0
            }
        );
        assert!(decode(&temp_slider(), b"warm").is_err());
        assert!(decode(&temp_slider(), b"NaN").is_err());
    }

    #[test]
    fn slider_rejects_values_off_the_step_grid() {
        assert_eq!(
            decode(&temp_slider(), b"21.37").unwrap_err(),
            MappingError::OffStep {
                value: 21.37,
                min: 16.0,
                step: 1.0
            }
        );

        let fine = control(
            "input_number.level",
            ControlSpec::Slider {
                min: 0.0,
                max: 1.0,
                step: 0.1,
            },
        );
        assert_eq!(decode(&fine, b"0.3").unwrap(), ControlValue::Number(0.3));
        assert!(decode(&fine, b"0.35").is_err());
    }

    #[test]
    fn slider_encode_snaps_to_the_step_grid() {
        let volume = control(
            "media_player.tv",
            ControlSpec::Slider {
                min: 0.0,
                max: 100.0,
                step: 1.0,
            },
        );
        // 0.29 * 100.0 is 28.999999999999996 in binary floating point.
        let state = EntityState::new("playing").with_attribute("volume_level", 0.29);
        assert_eq!(encode(&volume, &state).unwrap(), Some(ControlValue::Number(29.0)));

        let climate = EntityState::new("heat").with_attribute("temperature", 21.4);
        assert_eq!(
            encode(&temp_slider(), &climate).unwrap(),
            Some(ControlValue::Number(21.0))
        );
    }

    #[test]
    fn switch_decodes_case_insensitively() {
        let c = control("switch.fan", ControlSpec::Switch);
        assert_eq!(decode(&c, b" ON ").unwrap(), ControlValue::Switch(true));
        assert!(decode(&c, b"maybe").is_err());
        assert_eq!(decode(&c, &[0xff, 0xfe]).unwrap_err(), MappingError::NotUtf8);
    }

    #[test]
    fn select_rejects_unknown_options() {
        assert!(matches!(
            decode(&select(false), b"Turbo"),
            Err(MappingError::UnknownOption { .. })
        ));
    }

    #[test]
    fn slider_encode_clamps_and_reads_domain_defaults() {
        let climate = EntityState::new("heat").with_attribute("temperature", 35);
        assert_eq!(
            encode(&temp_slider(), &climate).unwrap(),
            Some(ControlValue::Number(30.0))
        );

        let dimmer = control(
            "light.desk",
            ControlSpec::Slider {
                min: 0.0,
                max: 255.0,
                step: 1.0,
            },
        );
        assert_eq!(
            encode(&dimmer, &EntityState::new("off")).unwrap(),
            Some(ControlValue::Number(0.0))
        );
        let on = EntityState::new("on").with_attribute("brightness", 180);
        assert_eq!(encode(&dimmer, &on).unwrap(), Some(ControlValue::Number(180.0)));
    }

    #[test]
    fn slider_reads_attribute_selectors() {
        let hue = control(
            "light.desk (hs_hue)",
            ControlSpec::Slider {
                min: 0.0,
                max: 360.0,
                step: 1.0,
            },
        );
        let state = EntityState::new("on").with_attribute("hs_color", json!([210.0, 80.0]));
        assert_eq!(encode(&hue, &state).unwrap(), Some(ControlValue::Number(210.0)));

        let missing = EntityState::new("on");
        assert!(matches!(
            encode(&hue, &missing),
            Err(MappingError::NotNumeric { .. })
        ));
    }

    #[test]
    fn select_strictness() {
        let state = EntityState::new("Turbo");
        assert_eq!(encode(&select(false), &state).unwrap(), None);
        assert!(encode(&select(true), &state).is_err());
        assert_eq!(
            encode(&select(true), &EntityState::new("Eco")).unwrap(),
            Some(ControlValue::Choice("Eco".into()))
        );
    }

    #[test]
    fn media_player_select_tracks_source() {
        let c = control(
            "media_player.tv",
            ControlSpec::Select {
                options: vec!["HDMI 1".into(), "HDMI 2".into()],
                strict: false,
            },
        );
        let state = EntityState::new("playing").with_attribute("source", "HDMI 2");
        assert_eq!(
            encode(&c, &state).unwrap(),
            Some(ControlValue::Choice("HDMI 2".into()))
        );
    }

    #[test]
    fn color_prefers_rgb_and_blacks_out_when_off() {
        let c = control("light.desk", ControlSpec::Color);
        let on = EntityState::new("on")
            .with_attribute("rgb_color", json!([1, 2, 3]))
            .with_attribute("hs_color", json!([0, 100]));
        assert_eq!(
            encode(&c, &on).unwrap(),
            Some(ControlValue::Color(Rgb::new(1, 2, 3)))
        );

        let hs_only = EntityState::new("on").with_attribute("hs_color", json!([0, 100]));
        assert_eq!(
            encode(&c, &hs_only).unwrap(),
            Some(ControlValue::Color(Rgb::new(255, 0, 0)))
        );

        let off = EntityState::new("off").with_attribute("rgb_color", json!([1, 2, 3]));
        assert_eq!(encode(&c, &off).unwrap(), Some(ControlValue::Color(Rgb::BLACK)));
    }

    #[test]
    fn unavailable_entities_encode_to_nothing() {
        let c = control("switch.fan", ControlSpec::Switch);
        assert_eq!(encode(&c, &EntityState::new("unavailable")).unwrap(), None);
    }
}
