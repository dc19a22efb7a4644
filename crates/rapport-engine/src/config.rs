//! Configuration loading and typed config structures for the Rapport engine.
//!
//! The configuration is a YAML document with four optional sections:
//!
//! ```yaml
//! store:
//!   event_log_capacity: 1000
//! admission:
//!   max_fact_len: 2000
//!   forbidden_substrings: ["<|", "|>", "system instruction"]
//! pipeline:
//!   default_capacity: 3
//!   default_policy: oldest
//!   wait_timeout_ms: 100
//!   stages:
//!     - name: tokens
//!       capacity: 64
//! logging:
//!   level: info
//!   json: false
//! ```
//!
//! Every key has a default, so an empty document is a valid configuration.

use std::path::Path;

use rapport_pipeline::PipelineConfig;
use rapport_state::{AdmissionConfig, StoreConfig};
use serde::Deserialize;

/// Environment variable that overrides `logging.level`.
pub const LOG_LEVEL_ENV: &str = "RAPPORT_LOG_LEVEL";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RapportConfig {
    /// Per-store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Fact admission policy used by the reducer.
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Defaults and named stages for generation pipelines.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RapportConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `RAPPORT_LOG_LEVEL` overrides `logging.level` when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.logging.apply_env_overrides();
        Ok(config)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Apply the `RAPPORT_LOG_LEVEL` override, if set and non-empty.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(LOG_LEVEL_ENV)
            && !val.trim().is_empty()
        {
            self.level = val;
        }
    }
}

fn default_log_level() -> String {
    String::from("info")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rapport_pipeline::OverflowPolicy;

    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = RapportConfig::parse("").unwrap();
        assert_eq!(config.store.event_log_capacity, 1000);
        assert_eq!(config.admission.max_fact_len, 2000);
        assert_eq!(config.pipeline.default_capacity, 3);
        assert_eq!(config.pipeline.default_policy, OverflowPolicy::Oldest);
        assert_eq!(config.pipeline.wait_timeout_ms, 100);
        assert!(!config.logging.json);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let yaml = "
store:
  event_log_capacity: 64
admission:
  forbidden_substrings: [\"ignore previous\"]
pipeline:
  default_policy: newest
  stages:
    - name: tokens
      capacity: 16
logging:
  json: true
";
        let config = RapportConfig::parse(yaml).unwrap();
        assert_eq!(config.store.event_log_capacity, 64);
        assert_eq!(config.admission.max_fact_len, 2000);
        assert_eq!(
            config.admission.forbidden_substrings,
            vec![String::from("ignore previous")]
        );
        assert_eq!(config.pipeline.default_policy, OverflowPolicy::Newest);
        assert_eq!(config.pipeline.stages.len(), 1);
        assert!(config.logging.json);
    }

    #[test]
    fn malformed_yaml_is_a_yaml_error() {
        let result = RapportConfig::parse("store: [unterminated");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let result = RapportConfig::parse("pipeline:\n  default_policy: sideways\n");
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = RapportConfig::from_file(Path::new("/nonexistent/rapport.yaml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
