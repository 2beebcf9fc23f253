// ── State-store identity and state types ──
//
// An `EntityRef` names an entity in the automation platform, optionally
// narrowed to a single attribute. `EntityState` is the platform's view
// of that entity: a primary state string plus free-form attributes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::CoreError;

// ── EntityRef ───────────────────────────────────────────────────────

/// Reference to a state-store entity, written `domain.object_id` or
/// `domain.object_id (attribute)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    entity_id: String,
    attribute: Option<String>,
}

impl EntityRef {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            attribute: None,
        }
    }

    pub fn with_attribute(entity_id: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            attribute: Some(attribute.into()),
        }
    }

    /// The bare entity id, e.g. `light.gaming_pc`.
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn attribute(&self) -> Option<&str> {
        self.attribute.as_deref()
    }

    /// The platform domain, e.g. `light` for `light.gaming_pc`.
    pub fn domain(&self) -> &str {
        self.entity_id
            .split_once('.')
            .map_or(self.entity_id.as_str(), |(domain, _)| domain)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.attribute {
            Some(attr) => write!(f, "{} ({attr})", self.entity_id),
            None => f.write_str(&self.entity_id),
        }
    }
}

impl FromStr for EntityRef {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();

        let (entity_id, attribute) = match raw.split_once('(') {
            Some((base, rest)) => {
                let attr = rest
                    .strip_suffix(')')
                    .map(str::trim)
                    .filter(|a| !a.is_empty() && !a.contains(['(', ')']))
                    .ok_or_else(|| {
                        CoreError::config(format!("entity {raw:?} has a malformed attribute"))
                    })?;
                (base.trim(), Some(attr.to_owned()))
            }
            None => (raw, None),
        };

        let well_formed = entity_id.split_once('.').is_some_and(|(domain, object)| {
            !domain.is_empty()
                && !object.is_empty()
                && !object.contains('.')
                && entity_id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        });
        if !well_formed {
            return Err(CoreError::config(format!(
                "entity {raw:?} is not of the form domain.object_id"
            )));
        }

        Ok(Self {
            entity_id: entity_id.to_owned(),
            attribute,
        })
    }
}

impl Serialize for EntityRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntityRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ── EntityState ─────────────────────────────────────────────────────

/// Snapshot of one entity as reported by the state store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityState {
    /// Primary state, e.g. `on`, `21.5`, `HDMI 1`.
    pub state: String,
    /// Platform attributes (`brightness`, `rgb_color`, `options`, ...).
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl EntityState {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            attributes: Map::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn is_on(&self) -> bool {
        self.state == "on"
    }
}

/// A state-store change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub entity_id: String,
    pub new_state: EntityState,
}
