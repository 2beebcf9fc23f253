// ── Core error types ──
//
// Every failure the synchronization engine can surface. Only `Config`
// blocks the operator; everything else is isolated to a single control
// or message and reported through the observability sink.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration errors ─────────────────────────────────────────
    #[error("Invalid panel configuration: {}", problems.join("; "))]
    Config { problems: Vec<String> },

    // ── Value mapping errors ─────────────────────────────────────────
    #[error(transparent)]
    Mapping(#[from] MappingError),

    // ── Transport errors ─────────────────────────────────────────────
    #[error("Transport error: {message}")]
    Transport { message: String },

    // ── State store errors ───────────────────────────────────────────
    #[error("Service call for {entity} failed: {message}")]
    Service { entity: String, message: String },

    #[error("Entity not found: {entity}")]
    NotFound { entity: String },

    #[error("Service call for {entity} timed out after {timeout_ms}ms")]
    Timeout { entity: String, timeout_ms: u64 },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Build a configuration error from a single problem description.
    pub fn config(problem: impl Into<String>) -> Self {
        Self::Config {
            problems: vec![problem.into()],
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn service(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            entity: entity.into(),
            message: message.into(),
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self, Self::Mapping(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// A value could not be encoded for, or decoded from, a control.
///
/// Always non-fatal: the offending message or update is dropped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MappingError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    #[error("malformed {kind} payload: {payload:?}")]
    Malformed { kind: &'static str, payload: String },

    #[error("value {value} is outside [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },

    #[error("value {value} is not a multiple of step {step} from {min}")]
    OffStep { value: f64, min: f64, step: f64 },

    #[error("{value:?} is not one of the configured options")]
    UnknownOption { value: String },

    #[error("entity state {state:?} is not numeric")]
    NotNumeric { state: String },

    #[error("invalid color: {reason}")]
    InvalidColor { reason: String },
}
