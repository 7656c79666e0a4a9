//! Runtime configuration
//!
//! Configuration is plain serde data with defaults for every field, so a
//! config file only needs to mention what it changes. RON is the native
//! format; JSON is accepted as well.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::assets::ExceptionPolicy;

/// Logging and fault policy of the asset registry.
///
/// All three switches are read at the moment they matter, so changing them
/// through [`crate::assets::AssetRegistry::config_mut`] affects the next
/// call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// What to do with synchronous faults and invalid keys
    pub exception_policy: ExceptionPolicy,
    /// Silence advisory warnings (missing key, wrong type)
    pub suppress_warning_logs: bool,
    /// Silence failure logs (empty payload, collision)
    pub suppress_error_logs: bool,
}

impl RegistryConfig {
    /// Set the exception policy
    #[must_use]
    pub fn with_exception_policy(mut self, policy: ExceptionPolicy) -> Self {
        self.exception_policy = policy;
        self
    }

    /// Enable or disable warning logs suppression
    #[must_use]
    pub fn with_suppress_warning_logs(mut self, suppress: bool) -> Self {
        self.suppress_warning_logs = suppress;
        self
    }

    /// Enable or disable error logs suppression
    #[must_use]
    pub fn with_suppress_error_logs(mut self, suppress: bool) -> Self {
        self.suppress_error_logs = suppress;
        self
    }
}

/// Message bus settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Time budget for draining queued messages each frame, in microseconds.
    /// Zero disables the budget.
    pub max_processing_time_us: u64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        // One frame at 60 FPS
        Self {
            max_processing_time_us: 16_667,
        }
    }
}

impl EventBusConfig {
    /// Per-frame budget, `None` when unlimited
    #[must_use]
    pub fn budget(&self) -> Option<Duration> {
        (self.max_processing_time_us > 0).then(|| Duration::from_micros(self.max_processing_time_us))
    }

    /// Set the per-frame budget in microseconds
    #[must_use]
    pub fn with_max_processing_time_us(mut self, micros: u64) -> Self {
        self.max_processing_time_us = micros;
        self
    }
}

/// Top level application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Asset registry settings
    pub registry: RegistryConfig,
    /// Message bus settings
    pub events: EventBusConfig,
}

impl AppConfig {
    /// Parse a RON document
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid configuration
    pub fn from_ron_str(source: &str) -> Result<Self, ConfigError> {
        ron::from_str(source).map_err(|e| ConfigError::Deserialize(e.to_string()))
    }

    /// Load a RON file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn load_ron(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_ron_str(&content)
    }

    /// Load a JSON file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Deserialize(e.to_string()))
    }

    /// Load a file, picking the format from its extension (`.json` or RON)
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::load_json(path),
            _ => Self::load_ron(path),
        }
    }

    /// Serialize to pretty RON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails
    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ConfigError::Serialize(e.to_string()))
    }
}

/// Errors that can occur while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),
    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialize(String),
}
