// ── Controls ──
//
// A control is a typed mapping from one state-store entity to a pair of
// transport topics. Controls never own state.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::entity::EntityRef;

// ── ControlKind ─────────────────────────────────────────────────────

/// Control kinds a display can render.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ControlKind {
    Switch,
    Slider,
    Select,
    Color,
}

// ── ControlSpec ─────────────────────────────────────────────────────

fn default_step() -> f64 {
    1.0
}

/// Kind-specific control parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlSpec {
    Switch,
    Slider {
        min: f64,
        max: f64,
        #[serde(default = "default_step")]
        step: f64,
    },
    Select {
        #[serde(deserialize_with = "option_list")]
        options: Vec<String>,
        /// Unknown store values raise a mapping error instead of being dropped.
        #[serde(default)]
        strict: bool,
    },
    Color,
}

impl ControlSpec {
    pub fn kind(&self) -> ControlKind {
        match self {
            Self::Switch => ControlKind::Switch,
            Self::Slider { .. } => ControlKind::Slider,
            Self::Select { .. } => ControlKind::Select,
            Self::Color => ControlKind::Color,
        }
    }
}

/// Options may be written as a YAML list or as one option per line.
fn option_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Lines(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::List(list) => list,
        Raw::Lines(text) => text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect(),
    })
}

// ── ControlConfig ───────────────────────────────────────────────────

/// A control as written in the panel configuration, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    pub label: String,
    pub entity: String,
    #[serde(flatten)]
    pub spec: ControlSpec,
}

// ── ControlId ───────────────────────────────────────────────────────

/// Identity of a control: (panel name, label).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ControlId {
    pub panel: String,
    pub label: String,
}

impl ControlId {
    pub fn new(panel: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            panel: panel.into(),
            label: label.into(),
        }
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.panel, self.label)
    }
}

// ── TopicBinding ────────────────────────────────────────────────────

/// The transport addresses derived for one control.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TopicBinding {
    pub command: String,
    pub state: String,
    pub refresh: String,
}

// ── Control ─────────────────────────────────────────────────────────

/// A validated control, owned by the panel model.
#[derive(Debug, Clone, PartialEq)]
pub struct Control {
    pub id: ControlId,
    pub entity: EntityRef,
    pub spec: ControlSpec,
    pub binding: TopicBinding,
}

impl Control {
    pub fn kind(&self) -> ControlKind {
        self.spec.kind()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_strings() {
        assert_eq!(ControlKind::Slider.to_string(), "slider");
        assert_eq!("color".parse::<ControlKind>().unwrap(), ControlKind::Color);
    }

    #[test]
    fn deserializes_slider_with_default_step() {
        let cfg: ControlConfig = serde_json::from_value(serde_json::json!({
            "label": "Temp",
            "type": "slider",
            "entity": "climate.office",
            "min": 16,
            "max": 30
        }))
        .unwrap();
        assert_eq!(
            cfg.spec,
            ControlSpec::Slider {
                min: 16.0,
                max: 30.0,
                step: 1.0
            }
        );
    }

    #[test]
    fn select_options_accept_newline_text() {
        let cfg: ControlConfig = serde_json::from_value(serde_json::json!({
            "label": "Source",
            "type": "select",
            "entity": "media_player.tv",
            "options": "HDMI 1\nHDMI 2\n\n TV \n"
        }))
        .unwrap();
        assert_eq!(
            cfg.spec,
            ControlSpec::Select {
                options: vec!["HDMI 1".into(), "HDMI 2".into(), "TV".into()],
                strict: false
            }
        );
    }
}
