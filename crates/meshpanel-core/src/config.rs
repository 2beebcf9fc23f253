// ── Runtime synchronization configuration ──
//
// These types describe *how* the engine behaves: topic layout and
// timing. The config crate builds a `SyncConfig` from files and
// environment; core never touches disk.

use std::time::Duration;

use crate::error::CoreError;

pub const DEFAULT_TOPIC_BASE: &str = "meshpanel";
pub const DEFAULT_IDEMPOTENCY_WINDOW: Duration = Duration::from_millis(1500);
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;
/// Upper bound for `max_in_flight`; each call holds a semaphore permit.
pub const MAX_IN_FLIGHT_LIMIT: usize = 1024;

/// Tuning for a single synchronization engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Root of every topic the engine publishes or subscribes to.
    pub topic_base: String,
    /// How long a value received from the panel suppresses an identical
    /// echo coming back from the state store.
    pub idempotency_window: Duration,
    /// Coalescing interval for state-store changes. Zero disables debouncing.
    pub debounce: Duration,
    /// Upper bound for a single state-store command.
    pub command_timeout: Duration,
    /// Maximum concurrent state-store calls (commands and discovery reads).
    pub max_in_flight: usize,
    /// Publish the definition and a state snapshot as soon as the
    /// transport connects, without waiting for an announce.
    pub publish_on_connect: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            topic_base: DEFAULT_TOPIC_BASE.into(),
            idempotency_window: DEFAULT_IDEMPOTENCY_WINDOW,
            debounce: DEFAULT_DEBOUNCE,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            publish_on_connect: true,
        }
    }
}

impl SyncConfig {
    /// Reject tuning values the engine cannot operate with.
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut problems = Vec::new();

        let base = self.topic_base.trim_matches('/');
        if base.is_empty() {
            problems.push("topic base must not be empty".to_owned());
        } else if base.contains(['+', '#']) {
            problems.push(format!(
                "topic base {:?} must not contain MQTT wildcards",
                self.topic_base
            ));
        }
        if self.idempotency_window.is_zero() {
            problems.push("idempotency window must be greater than zero".to_owned());
        }
        if self.command_timeout.is_zero() {
            problems.push("command timeout must be greater than zero".to_owned());
        }
        if self.max_in_flight == 0 || self.max_in_flight > MAX_IN_FLIGHT_LIMIT {
            problems.push(format!(
                "max_in_flight must be between 1 and {MAX_IN_FLIGHT_LIMIT} (got {})",
                self.max_in_flight
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Config { problems })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SyncConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_collects_all_problems() {
        let cfg = SyncConfig {
            topic_base: "panels/#".into(),
            idempotency_window: Duration::ZERO,
            max_in_flight: 0,
            ..SyncConfig::default()
        };
        let Err(CoreError::Config { problems }) = cfg.validate() else {
            panic!("expected config error");
        };
        assert_eq!(problems.len(), 3);
    }

    #[test]
    fn max_in_flight_is_bounded_above() {
        let cfg = SyncConfig {
            max_in_flight: usize::MAX,
            ..SyncConfig::default()
        };
        assert!(cfg.validate().unwrap_err().is_config());

        let at_limit = SyncConfig {
            max_in_flight: MAX_IN_FLIGHT_LIMIT,
            ..SyncConfig::default()
        };
        assert!(at_limit.validate().is_ok());
    }
}
