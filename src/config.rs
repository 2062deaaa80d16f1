//! YAML configuration for the modpipe pipeline.
//!
//! One document configures every stage: rate limiting, media-group
//! aggregation, channel routing, and the forbidden-word list. The transport
//! layer loads it at startup and hands the parsed config to
//! [`Pipeline::new`](crate::Pipeline::new).
//!
//! ## Example
//!
//! ```yaml
//! version: "1.0"
//! name: "production"
//!
//! limiter:
//!   max_messages: 10
//!   time_window_secs: 600
//!   cooldown_secs: 900
//!
//! aggregate:
//!   max_group_size: 10
//!   inactivity_timeout_secs: 30
//!   max_buffer_age_secs: 300
//!
//! routing:
//!   report_channel: "@boom"
//!   recommend_channel: "@recording"
//!
//! screen:
//!   categories:
//!     spam: ["免费领取", "点击链接"]
//! ```
//!
//! Omitted sections fall back to defaults; the default limiter values match
//! the production rate-limit policy (10 messages / 600 s window / 900 s
//! cooldown), and an omitted `screen.categories` uses the built-in word
//! list.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use aggregate::AggregateConfig;
use limiter::LimiterConfig;
use screen::WordList;

/// Errors that can occur when loading the pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),
}

/// Top-level configuration for the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ModpipeConfig {
    /// Configuration format version.
    pub version: String,

    /// Optional configuration name/description.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub limiter: LimiterYamlConfig,

    #[serde(default)]
    pub aggregate: AggregateYamlConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub screen: ScreenYamlConfig,
}

impl ModpipeConfig {
    /// Load a YAML configuration file from the given path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML configuration from a string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: ModpipeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        self.limiter.validate()?;
        self.aggregate.validate()?;
        self.routing.validate()?;

        Ok(())
    }
}

impl Default for ModpipeConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: None,
            limiter: LimiterYamlConfig::default(),
            aggregate: AggregateYamlConfig::default(),
            routing: RoutingConfig::default(),
            screen: ScreenYamlConfig::default(),
        }
    }
}

/// Rate limiter YAML configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterYamlConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages: u32,

    #[serde(default = "default_time_window_secs")]
    pub time_window_secs: u64,

    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl LimiterYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.max_messages == 0 {
            return Err(ConfigLoadError::Validation(
                "limiter.max_messages must be >= 1".to_string(),
            ));
        }
        if self.time_window_secs == 0 {
            return Err(ConfigLoadError::Validation(
                "limiter.time_window_secs must be >= 1".to_string(),
            ));
        }
        if self.cooldown_secs == 0 {
            return Err(ConfigLoadError::Validation(
                "limiter.cooldown_secs must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_limiter_config(&self) -> LimiterConfig {
        LimiterConfig {
            max_messages: self.max_messages,
            time_window: Duration::from_secs(self.time_window_secs),
            cooldown_time: Duration::from_secs(self.cooldown_secs),
        }
    }
}

impl Default for LimiterYamlConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            time_window_secs: default_time_window_secs(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// Media aggregator YAML configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateYamlConfig {
    #[serde(default = "default_max_group_size")]
    pub max_group_size: usize,

    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,

    #[serde(default = "default_max_buffer_age_secs")]
    pub max_buffer_age_secs: u64,
}

impl AggregateYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        self.to_aggregate_config()
            .validate()
            .map_err(|e| ConfigLoadError::Validation(e.to_string()))
    }

    pub fn to_aggregate_config(&self) -> AggregateConfig {
        AggregateConfig {
            max_group_size: self.max_group_size,
            inactivity_timeout: Duration::from_secs(self.inactivity_timeout_secs),
            max_buffer_age: Duration::from_secs(self.max_buffer_age_secs),
        }
    }
}

impl Default for AggregateYamlConfig {
    fn default() -> Self {
        Self {
            max_group_size: default_max_group_size(),
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            max_buffer_age_secs: default_max_buffer_age_secs(),
        }
    }
}

/// Destination channels for the two submission kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Channel receiving report-marked submissions.
    #[serde(default = "default_report_channel")]
    pub report_channel: String,

    /// Channel receiving everything else.
    #[serde(default = "default_recommend_channel")]
    pub recommend_channel: String,
}

impl RoutingConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.report_channel.trim().is_empty() {
            return Err(ConfigLoadError::Validation(
                "routing.report_channel must not be empty".to_string(),
            ));
        }
        if self.recommend_channel.trim().is_empty() {
            return Err(ConfigLoadError::Validation(
                "routing.recommend_channel must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            report_channel: default_report_channel(),
            recommend_channel: default_recommend_channel(),
        }
    }
}

/// Forbidden-word screening YAML configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScreenYamlConfig {
    /// Custom categorized word list; `None` uses the built-in list.
    #[serde(default)]
    pub categories: Option<BTreeMap<String, Vec<String>>>,
}

impl ScreenYamlConfig {
    pub fn word_list(&self) -> WordList {
        match &self.categories {
            Some(categories) => WordList::from_categories(categories.clone()),
            None => WordList::builtin().clone(),
        }
    }
}

// Helper functions for serde defaults
fn default_max_messages() -> u32 {
    10
}
fn default_time_window_secs() -> u64 {
    600
}
fn default_cooldown_secs() -> u64 {
    900
}
fn default_max_group_size() -> usize {
    10
}
fn default_inactivity_timeout_secs() -> u64 {
    30
}
fn default_max_buffer_age_secs() -> u64 {
    300
}
fn default_report_channel() -> String {
    "@boom".to_string()
}
fn default_recommend_channel() -> String {
    "@recording".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_valid_yaml() {
        let yaml = r#"
version: "1.0"
name: "test config"
limiter:
  max_messages: 5
  time_window_secs: 120
routing:
  report_channel: "@reports"
"#;

        let config = ModpipeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.name, Some("test config".to_string()));
        assert_eq!(config.limiter.max_messages, 5);
        assert_eq!(config.limiter.time_window_secs, 120);
        // Omitted fields keep their defaults.
        assert_eq!(config.limiter.cooldown_secs, 900);
        assert_eq!(config.routing.report_channel, "@reports");
        assert_eq!(config.routing.recommend_channel, "@recording");
    }

    #[test]
    fn test_load_from_file() {
        let yaml = r#"
version: "1.0"
aggregate:
  max_group_size: 10
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml.as_bytes()).unwrap();

        let config = ModpipeConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.aggregate.max_group_size, 10);
    }

    #[test]
    fn test_default_config_matches_production_policy() {
        let config = ModpipeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.limiter.max_messages, 10);
        assert_eq!(config.limiter.time_window_secs, 600);
        assert_eq!(config.limiter.cooldown_secs, 900);
        assert_eq!(config.aggregate.max_group_size, 10);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let result = ModpipeConfig::from_yaml(r#"version: "2.0""#);
        assert!(matches!(
            result,
            Err(ConfigLoadError::UnsupportedVersion(v)) if v == "2.0"
        ));
    }

    #[test]
    fn test_limiter_validation() {
        let yaml = r#"
version: "1.0"
limiter:
  max_messages: 0
"#;

        let result = ModpipeConfig::from_yaml(yaml);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("max_messages must be >= 1"));
    }

    #[test]
    fn test_empty_channel_rejected() {
        let yaml = r#"
version: "1.0"
routing:
  report_channel: "  "
"#;

        let result = ModpipeConfig::from_yaml(yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("report_channel"));
    }

    #[test]
    fn test_custom_word_list_replaces_builtin() {
        let yaml = r#"
version: "1.0"
screen:
  categories:
    spam: ["免费领取"]
"#;

        let config = ModpipeConfig::from_yaml(yaml).unwrap();
        let list = config.screen.word_list();
        assert_eq!(list.len(), 1);
        assert!(list.contains_forbidden("点我免费领取大奖"));
        assert!(!list.contains_forbidden("赌博"));
    }

    #[test]
    fn test_builtin_word_list_when_omitted() {
        let config = ModpipeConfig::from_yaml(r#"version: "1.0""#).unwrap();
        let list = config.screen.word_list();
        assert!(list.contains_forbidden("赌博"));
    }

    #[test]
    fn test_duration_conversion() {
        let config = ModpipeConfig::default();
        let limiter_cfg = config.limiter.to_limiter_config();
        assert_eq!(limiter_cfg.time_window, Duration::from_secs(600));
        assert_eq!(limiter_cfg.cooldown_time, Duration::from_secs(900));

        let agg_cfg = config.aggregate.to_aggregate_config();
        assert_eq!(agg_cfg.inactivity_timeout, Duration::from_secs(30));
    }
}
