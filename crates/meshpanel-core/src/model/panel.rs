// ── Panels and the panel model ──
//
// `PanelModel` is built once from validated configuration and never
// mutated. Reconfiguration builds a fresh model and swaps it in whole.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::control::{Control, ControlConfig, ControlId, ControlKind, ControlSpec, TopicBinding};
use super::entity::EntityRef;
use crate::error::CoreError;
use crate::topic::{self, TopicScheme};

// ── PanelConfig ─────────────────────────────────────────────────────

/// A panel as written in the configuration, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelConfig {
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub state_entity: Option<String>,
    #[serde(default)]
    pub controls: Vec<ControlConfig>,
}

// ── Panel ───────────────────────────────────────────────────────────

/// A validated panel. Control order is render order.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    pub name: String,
    pub icon: Option<String>,
    pub state_entity: Option<EntityRef>,
    /// Retained summary topic, present when `state_entity` is set.
    pub state_topic: Option<String>,
    pub controls: Vec<Arc<Control>>,
}

// ── PanelModel ──────────────────────────────────────────────────────

/// Immutable, validated view of every configured panel and control.
///
/// Safe for unsynchronized concurrent reads. Topic bindings are
/// guaranteed injective: no two controls share a command or state topic.
#[derive(Debug, Clone)]
pub struct PanelModel {
    topics: TopicScheme,
    panels: Vec<Panel>,
    controls: Vec<Arc<Control>>,
    by_command: HashMap<String, usize>,
    by_refresh: HashMap<String, usize>,
    by_id: HashMap<ControlId, usize>,
    by_entity: HashMap<String, Vec<usize>>,
    summaries_by_entity: HashMap<String, Vec<usize>>,
}

impl PanelModel {
    /// Validate the configuration and derive topic bindings.
    ///
    /// Every problem found is reported in a single [`CoreError::Config`].
    pub fn build(topic_base: &str, configs: &[PanelConfig]) -> Result<Self, CoreError> {
        let topics = TopicScheme::new(topic_base);
        let mut problems = Vec::new();
        let mut claimed: HashMap<String, String> = HashMap::new();
        let mut claim = |topic: String, owner: String, problems: &mut Vec<String>| {
            if let Some(existing) = claimed.get(&topic) {
                problems.push(format!(
                    "topic {topic:?} is claimed by both {existing} and {owner}"
                ));
            } else {
                claimed.insert(topic, owner);
            }
        };

        for reserved in [topics.announce(), topics.discovery_config(), topics.notify()] {
            claim(reserved, "the engine".to_owned(), &mut problems);
        }

        let mut panels = Vec::with_capacity(configs.len());
        let mut controls = Vec::new();
        let mut seen_panels = BTreeSet::new();

        for cfg in configs {
            let name = cfg.name.trim();
            if !topic::is_valid_level(name) {
                problems.push(format!(
                    "panel name {:?} must be non-empty and free of '/', '+' and '#'",
                    cfg.name
                ));
                continue;
            }
            if !seen_panels.insert(name.to_owned()) {
                problems.push(format!("panel {name:?} is defined more than once"));
                continue;
            }

            let state_entity = match cfg.state_entity.as_deref().map(str::parse::<EntityRef>) {
                Some(Ok(entity)) => Some(entity),
                Some(Err(err)) => {
                    problems.push(format!("panel {name:?} state_entity: {err}"));
                    None
                }
                None => None,
            };
            let state_topic = state_entity.as_ref().map(|_| topics.panel_state(name));
            if let Some(topic) = &state_topic {
                claim(topic.clone(), format!("panel {name:?}"), &mut problems);
            }

            let mut panel_controls = Vec::with_capacity(cfg.controls.len());
            for control_cfg in &cfg.controls {
                match build_control(&topics, name, control_cfg) {
                    Ok(control) => {
                        let owner = format!("control {}", control.id);
                        claim(control.binding.command.clone(), owner.clone(), &mut problems);
                        claim(control.binding.state.clone(), owner.clone(), &mut problems);
                        claim(control.binding.refresh.clone(), owner, &mut problems);
                        let control = Arc::new(control);
                        panel_controls.push(Arc::clone(&control));
                        controls.push(control);
                    }
                    Err(mut found) => problems.append(&mut found),
                }
            }

            panels.push(Panel {
                name: name.to_owned(),
                icon: cfg.icon.clone(),
                state_entity,
                state_topic,
                controls: panel_controls,
            });
        }

        if !problems.is_empty() {
            return Err(CoreError::Config { problems });
        }

        let mut model = Self {
            topics,
            panels,
            controls,
            by_command: HashMap::new(),
            by_refresh: HashMap::new(),
            by_id: HashMap::new(),
            by_entity: HashMap::new(),
            summaries_by_entity: HashMap::new(),
        };
        model.index();
        Ok(model)
    }

    /// An empty model, used before the first configuration is loaded.
    pub fn empty(topic_base: &str) -> Self {
        Self {
            topics: TopicScheme::new(topic_base),
            panels: Vec::new(),
            controls: Vec::new(),
            by_command: HashMap::new(),
            by_refresh: HashMap::new(),
            by_id: HashMap::new(),
            by_entity: HashMap::new(),
            summaries_by_entity: HashMap::new(),
        }
    }

    fn index(&mut self) {
        for (idx, control) in self.controls.iter().enumerate() {
            self.by_command.insert(control.binding.command.clone(), idx);
            self.by_refresh.insert(control.binding.refresh.clone(), idx);
            self.by_id.insert(control.id.clone(), idx);
            self.by_entity
                .entry(control.entity.entity_id().to_owned())
                .or_default()
                .push(idx);
        }
        for (idx, panel) in self.panels.iter().enumerate() {
            if let Some(entity) = &panel.state_entity {
                self.summaries_by_entity
                    .entry(entity.entity_id().to_owned())
                    .or_default()
                    .push(idx);
            }
        }
    }

    // ── Lookups ──────────────────────────────────────────────────────

    pub fn topics(&self) -> &TopicScheme {
        &self.topics
    }

    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    /// Every control, in panel order then render order.
    pub fn all_controls(&self) -> &[Arc<Control>] {
        &self.controls
    }

    /// Resolve a command topic to the control it drives.
    pub fn resolve(&self, topic: &str) -> Option<&Arc<Control>> {
        self.by_command
            .get(topic)
            .and_then(|&idx| self.controls.get(idx))
    }

    /// Resolve a refresh-request topic to its control.
    pub fn resolve_refresh(&self, topic: &str) -> Option<&Arc<Control>> {
        self.by_refresh
            .get(topic)
            .and_then(|&idx| self.controls.get(idx))
    }

    pub fn control(&self, id: &ControlId) -> Option<&Arc<Control>> {
        self.by_id.get(id).and_then(|&idx| self.controls.get(idx))
    }

    pub fn binding_for(&self, id: &ControlId) -> Option<&TopicBinding> {
        self.control(id).map(|c| &c.binding)
    }

    /// Controls backed by the given entity id (several may share one).
    pub fn controls_for_entity<'a>(
        &'a self,
        entity_id: &str,
    ) -> impl Iterator<Item = &'a Arc<Control>> + 'a {
        self.by_entity
            .get(entity_id)
            .into_iter()
            .flatten()
            .filter_map(|&idx| self.controls.get(idx))
    }

    /// Panels whose summary indicator follows the given entity id.
    pub fn panels_for_summary_entity<'a>(
        &'a self,
        entity_id: &str,
    ) -> impl Iterator<Item = &'a Panel> + 'a {
        self.summaries_by_entity
            .get(entity_id)
            .into_iter()
            .flatten()
            .filter_map(|&idx| self.panels.get(idx))
    }

    /// Every entity id the engine must watch, sorted.
    pub fn watched_entities(&self) -> BTreeSet<String> {
        self.by_entity
            .keys()
            .chain(self.summaries_by_entity.keys())
            .cloned()
            .collect()
    }

    pub fn kinds_in_use(&self) -> BTreeSet<ControlKind> {
        self.controls.iter().map(|c| c.kind()).collect()
    }

    pub fn contains(&self, id: &ControlId) -> bool {
        self.by_id.contains_key(id)
    }
}

// ── Validation helpers ──────────────────────────────────────────────

fn build_control(
    topics: &TopicScheme,
    panel: &str,
    cfg: &ControlConfig,
) -> Result<Control, Vec<String>> {
    let label = cfg.label.trim();
    let mut problems = Vec::new();

    if !topic::is_valid_level(label) {
        problems.push(format!(
            "panel {panel:?}: control label {:?} must be non-empty and free of '/', '+' and '#'",
            cfg.label
        ));
    }

    let entity = match cfg.entity.parse::<EntityRef>() {
        Ok(entity) => Some(entity),
        Err(err) => {
            problems.push(format!("control {panel}/{label}: {err}"));
            None
        }
    };

    match &cfg.spec {
        ControlSpec::Slider { min, max, step } => {
            if !min.is_finite() || !max.is_finite() || min >= max {
                problems.push(format!(
                    "control {panel}/{label}: slider needs min < max (got {min}..{max})"
                ));
            }
            if !step.is_finite() || *step <= 0.0 {
                problems.push(format!(
                    "control {panel}/{label}: slider step must be positive (got {step})"
                ));
            }
        }
        ControlSpec::Select { options, .. } => {
            if options.is_empty() {
                problems.push(format!(
                    "control {panel}/{label}: select needs at least one option"
                ));
            }
            let unique: BTreeSet<&String> = options.iter().collect();
            if unique.len() != options.len() {
                problems.push(format!(
                    "control {panel}/{label}: select options must be unique"
                ));
            }
        }
        ControlSpec::Switch | ControlSpec::Color => {}
    }

    match entity {
        Some(entity) if problems.is_empty() => Ok(Control {
            id: ControlId::new(panel, label),
            entity,
            spec: cfg.spec.clone(),
            binding: TopicBinding {
                command: topics.command(panel, label),
                state: topics.state(panel, label),
                refresh: topics.refresh(panel, label),
            },
        }),
        _ => Err(problems),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn switch(label: &str, entity: &str) -> ControlConfig {
        ControlConfig {
            label: label.into(),
            entity: entity.into(),
            spec: ControlSpec::Switch,
        }
    }

    fn panel(name: &str, controls: Vec<ControlConfig>) -> PanelConfig {
        PanelConfig {
            name: name.into(),
            icon: None,
            state_entity: None,
            controls,
        }
    }

    fn problems(result: Result<PanelModel, CoreError>) -> Vec<String> {
        match result {
            Err(CoreError::Config { problems }) => problems,
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn builds_bindings_and_indexes() {
        let model = PanelModel::build(
            "mp",
            &[panel(
                "Gaming Setup",
                vec![
                    switch("Power", "light.gaming_pc"),
                    ControlConfig {
                        label: "Color".into(),
                        entity: "light.gaming_pc".into(),
                        spec: ControlSpec::Color,
                    },
                ],
            )],
        )
        .unwrap();

        let id = ControlId::new("Gaming Setup", "Power");
        let binding = model.binding_for(&id).unwrap();
        assert_eq!(binding.command, "mp/Gaming Setup/Power/set");
        assert_eq!(binding.state, "mp/Gaming Setup/Power/state");
        assert_eq!(model.resolve("mp/Gaming Setup/Power/set").unwrap().id, id);
        assert!(model.resolve("mp/Gaming Setup/Power/state").is_none());
        assert_eq!(model.controls_for_entity("light.gaming_pc").count(), 2);
        assert_eq!(model.all_controls()[1].id.label, "Color");
    }

    #[test]
    fn duplicate_labels_collide() {
        let found = problems(PanelModel::build(
            "mp",
            &[panel(
                "Office",
                vec![switch("Lamp", "light.a"), switch("Lamp", "light.b")],
            )],
        ));
        assert!(found.iter().any(|p| p.contains("claimed by both")), "{found:?}");
    }

    #[test]
    fn duplicate_panels_rejected() {
        let found = problems(PanelModel::build(
            "mp",
            &[panel("Office", vec![]), panel("Office", vec![])],
        ));
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn invalid_slider_and_select_rejected() {
        let found = problems(PanelModel::build(
            "mp",
            &[panel(
                "Office",
                vec![
                    ControlConfig {
                        label: "Temp".into(),
                        entity: "climate.office".into(),
                        spec: ControlSpec::Slider {
                            min: 30.0,
                            max: 16.0,
                            step: 0.0,
                        },
                    },
                    ControlConfig {
                        label: "Mode".into(),
                        entity: "input_select.mode".into(),
                        spec: ControlSpec::Select {
                            options: vec![],
                            strict: false,
                        },
                    },
                    switch("Bad", "not-an-entity"),
                    switch("a/b", "light.x"),
                ],
            )],
        ));
        assert_eq!(found.len(), 5, "{found:?}");
    }

    #[test]
    fn summary_entity_is_watched() {
        let mut cfg = panel("Office", vec![switch("Lamp", "light.lamp")]);
        cfg.state_entity = Some("binary_sensor.occupied".into());
        let model = PanelModel::build("mp", &[cfg]).unwrap();

        let watched: Vec<_> = model.watched_entities().into_iter().collect();
        assert_eq!(watched, vec!["binary_sensor.occupied", "light.lamp"]);
        assert_eq!(
            model.panels()[0].state_topic.as_deref(),
            Some("mp/Office/state")
        );
        assert_eq!(
            model.panels_for_summary_entity("binary_sensor.occupied").count(),
            1
        );
    }

    #[test]
    fn kinds_in_use_are_distinct() {
        let model = PanelModel::build(
            "mp",
            &[panel(
                "Office",
                vec![switch("A", "light.a"), switch("B", "light.b")],
            )],
        )
        .unwrap();
        assert_eq!(
            model.kinds_in_use().into_iter().collect::<Vec<_>>(),
            vec![ControlKind::Switch]
        );
    }
}
