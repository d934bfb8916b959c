use crate::core::errors::{CoordError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Label used in logs and in the episode report
    pub name: String,
    /// Bound of the fan-in channel jobs report completions on
    pub channel_capacity: usize,
    /// Warn when no completion arrives within this many milliseconds
    pub stall_warning_ms: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            name: "episode".to_string(),
            channel_capacity: 64,
            stall_warning_ms: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CoordError::configuration_field(
                "name must not be empty",
                "name",
            ));
        }
        if self.channel_capacity == 0 {
            return Err(CoordError::configuration_field(
                "channel_capacity must be greater than 0",
                "channel_capacity",
            ));
        }
        if self.stall_warning_ms == Some(0) {
            return Err(CoordError::configuration_field(
                "stall_warning_ms must be greater than 0 when set",
                "stall_warning_ms",
            ));
        }
        Ok(())
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            CoordError::configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_stall_warning(mut self, after: Duration) -> Self {
        self.stall_warning_ms = Some(after.as_millis() as u64);
        self
    }

    pub fn stall_warning(&self) -> Option<Duration> {
        self.stall_warning_ms.map(Duration::from_millis)
    }
}
