//! CLI error types with miette diagnostics.
//!
//! Maps `ConfigError` and `CoreError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use meshpanel_config::ConfigError;
use meshpanel_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────

    #[error("Configuration file not found: {path}")]
    #[diagnostic(
        code(meshpanel::no_config),
        help(
            "Pass --config <path> or set MESHPANEL_CONFIG.\n\
             Default location: {default_path}"
        )
    )]
    NoConfig { path: String, default_path: String },

    #[error("Invalid configuration")]
    #[diagnostic(
        code(meshpanel::invalid_config),
        help("{problems}")
    )]
    InvalidConfig { problems: String },

    #[error(transparent)]
    #[diagnostic(code(meshpanel::config))]
    Config(Box<figment::Error>),

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(meshpanel::validation))]
    Validation { field: String, reason: String },

    // ── Engine ───────────────────────────────────────────────────────

    #[error("Engine error: {0}")]
    #[diagnostic(code(meshpanel::engine))]
    Engine(CoreError),

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON encoding failed: {0}")]
    #[diagnostic(code(meshpanel::json))]
    Json(#[from] serde_json::Error),

    #[error("YAML encoding failed: {0}")]
    #[diagnostic(code(meshpanel::yaml))]
    Yaml(#[from] serde_yaml::Error),
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoConfig { .. } | Self::InvalidConfig { .. } | Self::Config(_) => {
                exit_code::CONFIG
            }
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError / ConfigError → CliError mapping ───────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Config { problems } => Self::InvalidConfig {
                problems: problems
                    .iter()
                    .map(|p| format!("- {p}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            },
            other => Self::Engine(other),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound { path } => Self::NoConfig {
                path: path.display().to_string(),
                default_path: meshpanel_config::config_path().display().to_string(),
            },
            ConfigError::Figment(inner) => Self::Config(inner),
            ConfigError::Model(core) => core.into(),
            ConfigError::Serialization(e) => Self::Yaml(e),
            ConfigError::Io(e) => Self::Io(e),
        }
    }
}
