//! Session configuration.
//!
//! Loaded from YAML; every field has a default so an empty document is a
//! valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What happens to a pending-connect entry when its peer leaves before its
/// metadata arrived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PendingPolicy {
    /// Drop the entry and let the peers queued behind it drain
    #[default]
    Purge,
    /// Keep the entry; everything queued behind it stays blocked
    Retain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Name of the session to join
    pub session_name: String,
    /// Maximum number of participants the session accepts
    pub max_participants: usize,
    /// Period of the role-change watcher, in milliseconds
    pub tick_interval_ms: u64,
    pub pending_policy: PendingPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_name: format!("session-{}", uuid::Uuid::new_v4()),
            max_participants: 16,
            tick_interval_ms: 50,
            pending_policy: PendingPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tickIntervalMs must be positive".into()));
        }
        if self.max_participants == 0 {
            return Err(ConfigError::Invalid("maxParticipants must be positive".into()));
        }
        if self.session_name.trim().is_empty() {
            return Err(ConfigError::Invalid("sessionName cannot be empty".into()));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config syntax: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = SessionConfig::from_yaml_str("{}").unwrap();
        assert!(config.session_name.starts_with("session-"));
        assert_eq!(config.max_participants, 16);
        assert_eq!(config.tick_interval(), Duration::from_millis(50));
        assert_eq!(config.pending_policy, PendingPolicy::Purge);
    }

    #[test]
    fn test_parses_camel_case_fields() {
        let yaml = "sessionName: lobby\n\
                    maxParticipants: 4\n\
                    tickIntervalMs: 100\n\
                    pendingPolicy: retain\n";
        let config = SessionConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.session_name, "lobby");
        assert_eq!(config.max_participants, 4);
        assert_eq!(config.tick_interval_ms, 100);
        assert_eq!(config.pending_policy, PendingPolicy::Retain);
    }

    #[test]
    fn test_rejects_zero_tick_interval() {
        let result = SessionConfig::from_yaml_str("tickIntervalMs: 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_zero_participants() {
        let result = SessionConfig::from_yaml_str("maxParticipants: 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_unknown_policy() {
        let result = SessionConfig::from_yaml_str("pendingPolicy: sometimes");
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sessionName: from-file").unwrap();

        let config = SessionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.session_name, "from-file");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = SessionConfig::from_file("/definitely/not/here.yaml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
