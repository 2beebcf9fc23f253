//! Configuration for the meshpanel engine and CLI.
//!
//! One YAML document holds the panel definitions and the sync tuning.
//! Loading merges built-in defaults, the file, and `MESHPANEL_*`
//! environment variables (in that order), then translates the result to
//! `meshpanel_core::SyncConfig` and a validated `PanelModel`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use meshpanel_core::config::{
    DEFAULT_COMMAND_TIMEOUT, DEFAULT_DEBOUNCE, DEFAULT_IDEMPOTENCY_WINDOW, DEFAULT_MAX_IN_FLIGHT,
    DEFAULT_TOPIC_BASE,
};
use meshpanel_core::{CoreError, PanelConfig, PanelModel, SyncConfig};

pub const CONFIG_FILE_NAME: &str = "meshpanel.yaml";
pub const ENV_PREFIX: &str = "MESHPANEL_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error(transparent)]
    Model(#[from] CoreError),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── YAML config structs ─────────────────────────────────────────────

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub panels: Vec<PanelConfig>,
}

/// Engine tuning, in the units operators write.
///
/// `idempotencyWindowMs` and `debounceMs` are accepted as camelCase
/// spellings; when present they take precedence over the snake_case keys.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SyncSettings {
    #[serde(default = "default_topic_base")]
    pub topic_base: String,

    #[serde(default = "default_idempotency_window_ms")]
    pub idempotency_window_ms: u64,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    #[serde(default = "default_publish_on_connect")]
    pub publish_on_connect: bool,

    #[serde(rename = "idempotencyWindowMs", default, skip_serializing)]
    idempotency_window_ms_camel: Option<u64>,

    #[serde(rename = "debounceMs", default, skip_serializing)]
    debounce_ms_camel: Option<u64>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            topic_base: default_topic_base(),
            idempotency_window_ms: default_idempotency_window_ms(),
            debounce_ms: default_debounce_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            max_in_flight: default_max_in_flight(),
            publish_on_connect: default_publish_on_connect(),
            idempotency_window_ms_camel: None,
            debounce_ms_camel: None,
        }
    }
}

fn default_topic_base() -> String {
    DEFAULT_TOPIC_BASE.into()
}
fn default_idempotency_window_ms() -> u64 {
    millis(DEFAULT_IDEMPOTENCY_WINDOW)
}
fn default_debounce_ms() -> u64 {
    millis(DEFAULT_DEBOUNCE)
}
fn default_command_timeout_ms() -> u64 {
    millis(DEFAULT_COMMAND_TIMEOUT)
}
fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}
fn default_publish_on_connect() -> bool {
    true
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl SyncSettings {
    pub fn idempotency_window(&self) -> Duration {
        Duration::from_millis(
            self.idempotency_window_ms_camel
                .unwrap_or(self.idempotency_window_ms),
        )
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms_camel.unwrap_or(self.debounce_ms))
    }
}

impl Config {
    /// Translate tuning to the core's `SyncConfig` and validate it.
    pub fn to_sync_config(&self) -> Result<SyncConfig, ConfigError> {
        let sync = SyncConfig {
            topic_base: self.sync.topic_base.clone(),
            idempotency_window: self.sync.idempotency_window(),
            debounce: self.sync.debounce(),
            command_timeout: Duration::from_millis(self.sync.command_timeout_ms),
            max_in_flight: self.sync.max_in_flight,
            publish_on_connect: self.sync.publish_on_connect,
        };
        sync.validate()?;
        Ok(sync)
    }

    /// Validate the panels and derive every topic binding.
    pub fn build_model(&self) -> Result<PanelModel, ConfigError> {
        Ok(PanelModel::build(&self.sync.topic_base, &self.panels)?)
    }

    /// Render the effective configuration as YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        let mut effective = self.clone();
        effective.sync.idempotency_window_ms = millis(self.sync.idempotency_window());
        effective.sync.debounce_ms = millis(self.sync.debounce());
        Ok(serde_yaml::to_string(&effective)?)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "meshpanel", "meshpanel").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push(CONFIG_FILE_NAME);
            p
        },
        |dirs| dirs.config_dir().join(CONFIG_FILE_NAME),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("meshpanel");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the configuration from defaults, file and environment.
///
/// An explicit `path` must exist; the default path may be absent, in
/// which case only defaults and environment apply.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(explicit) if !explicit.exists() => {
            return Err(ConfigError::NotFound {
                path: explicit.to_path_buf(),
            });
        }
        Some(explicit) => explicit.to_path_buf(),
        None => config_path(),
    };

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Yaml::file(&path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if nothing usable is found.
pub fn load_config_or_default() -> Config {
    load_config(None).unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    fn write_config(yaml: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    const SAMPLE: &str = r#"
sync:
  topic_base: home/panels
  idempotencyWindowMs: 900
  debounce_ms: 100
panels:
  - name: Gaming Setup
    icon: mdi:controller
    state_entity: light.gaming_pc
    controls:
      - label: Power
        entity: light.gaming_pc
        type: switch
      - label: Brightness
        entity: light.gaming_pc (brightness)
        type: slider
        min: 0
        max: 255
  - name: Living Room
    controls:
      - label: Source
        entity: media_player.tv
        type: select
        options: |
          HDMI 1
          HDMI 2
"#;

    #[test]
    fn loads_panels_and_tuning() {
        let file = write_config(SAMPLE);
        let config = load_config(Some(file.path())).unwrap();

        let sync = config.to_sync_config().unwrap();
        assert_eq!(sync.topic_base, "home/panels");
        assert_eq!(sync.idempotency_window, Duration::from_millis(900));
        assert_eq!(sync.debounce, Duration::from_millis(100));
        assert_eq!(sync.command_timeout, DEFAULT_COMMAND_TIMEOUT);
        assert!(sync.publish_on_connect);

        let model = config.build_model().unwrap();
        assert_eq!(model.panels().len(), 2);
        assert_eq!(model.all_controls().len(), 3);
        assert!(
            model
                .resolve("home/panels/Living Room/Source/set")
                .is_some()
        );
    }

    #[test]
    fn defaults_apply_without_a_sync_section() {
        let file = write_config("panels: []\n");
        let config = load_config(Some(file.path())).unwrap();
        let sync = config.to_sync_config().unwrap();
        assert_eq!(sync, SyncConfig::default());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/meshpanel.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn invalid_panels_report_every_problem() {
        let file = write_config(
            r"
panels:
  - name: Office
    controls:
      - label: Temp
        entity: climate.office
        type: slider
        min: 30
        max: 16
      - label: Mode
        entity: not-an-entity
        type: switch
",
        );
        let config = load_config(Some(file.path())).unwrap();
        let Err(ConfigError::Model(CoreError::Config { problems })) = config.build_model() else {
            panic!("expected a configuration error");
        };
        assert_eq!(problems.len(), 2, "{problems:?}");
    }

    #[test]
    fn invalid_tuning_is_rejected() {
        let file = write_config("sync:\n  max_in_flight: 0\n");
        let config = load_config(Some(file.path())).unwrap();
        assert!(config.to_sync_config().is_err());
    }

    #[test]
    fn effective_yaml_uses_resolved_values() {
        let file = write_config(SAMPLE);
        let config = load_config(Some(file.path())).unwrap();
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("idempotency_window_ms: 900"), "{yaml}");
        assert!(!yaml.contains("idempotencyWindowMs"));
    }
}
