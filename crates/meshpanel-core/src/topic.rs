// ── Topic layout ──
//
// Every address the engine uses is derived here from a single base.
// Nothing else in the crate formats topic strings.

/// Topic builder rooted at the configured base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    base: String,
}

impl TopicScheme {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_matches('/').to_owned(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Device → engine: device identity and capabilities.
    pub fn announce(&self) -> String {
        format!("{}/discovery/announce", self.base)
    }

    /// Engine → device (retained): full panel definition.
    pub fn discovery_config(&self) -> String {
        format!("{}/discovery/config", self.base)
    }

    /// Engine → device (retained): current control value.
    pub fn state(&self, panel: &str, control: &str) -> String {
        format!("{}/{panel}/{control}/state", self.base)
    }

    /// Device → engine: user changed the control.
    pub fn command(&self, panel: &str, control: &str) -> String {
        format!("{}/{panel}/{control}/set", self.base)
    }

    /// Device → engine: republish the control's current value.
    pub fn refresh(&self, panel: &str, control: &str) -> String {
        format!("{}/{panel}/{control}/get", self.base)
    }

    /// Engine → device (retained): panel summary state.
    pub fn panel_state(&self, panel: &str) -> String {
        format!("{}/{panel}/state", self.base)
    }

    /// Engine → device: transient notification.
    pub fn notify(&self) -> String {
        format!("{}/notify", self.base)
    }

    /// Subscription filters the engine needs on the transport.
    pub fn subscriptions(&self) -> [String; 3] {
        [
            self.announce(),
            format!("{}/+/+/set", self.base),
            format!("{}/+/+/get", self.base),
        ]
    }
}

/// MQTT topic filter matching with `+` (one level) and `#` (remaining levels).
pub fn matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Whether a single topic level is safe to embed in a topic.
pub fn is_valid_level(level: &str) -> bool {
    !level.is_empty() && !level.contains(['/', '+', '#'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_control_topics() {
        let topics = TopicScheme::new("meshpanel/");
        assert_eq!(
            topics.state("Gaming Setup", "Power"),
            "meshpanel/Gaming Setup/Power/state"
        );
        assert_eq!(
            topics.command("Gaming Setup", "Power"),
            "meshpanel/Gaming Setup/Power/set"
        );
        assert_eq!(topics.announce(), "meshpanel/discovery/announce");
        assert_eq!(topics.discovery_config(), "meshpanel/discovery/config");
    }

    #[test]
    fn wildcard_matching() {
        assert!(matches("a/+/+/set", "a/Panel/Power/set"));
        assert!(!matches("a/+/+/set", "a/Panel/Power/state"));
        assert!(!matches("a/+/set", "a/Panel/Power/set"));
        assert!(matches("a/#", "a/Panel/Power/set"));
        assert!(matches("a/#", "a"));
        assert!(matches("a/b", "a/b"));
        assert!(!matches("a/b", "a/b/c"));
    }

    #[test]
    fn level_validation() {
        assert!(is_valid_level("Gaming Setup"));
        assert!(!is_valid_level(""));
        assert!(!is_valid_level("a/b"));
        assert!(!is_valid_level("#"));
    }
}
