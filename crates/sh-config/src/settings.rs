//! Typed view of configuration.yaml

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;
use serde::Deserialize;
use serde_yaml::Value;
use std::path::Path;
use tracing::{debug, info};

pub const CONFIG_FILE: &str = "configuration.yaml";

/// Top-level settings; every section is optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logger: LoggerConfig,
    pub http: HttpConfig,
    pub subscription_helper: SubscriptionHelperConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Default level filter, used when RUST_LOG is unset
    pub default: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            default: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub server_host: String,
    pub server_port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: 8123,
        }
    }
}

/// How `update_options` finds its target entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetResolution {
    /// `config_entry_id`, or the owning entry of `entity_id`
    #[default]
    EntryOrEntity,
    /// Only `config_entry_id` is accepted
    EntryIdOnly,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubscriptionHelperConfig {
    /// Sensor refresh interval in seconds
    pub update_interval: u64,
    pub target_resolution: TargetResolution,
    /// Subscriptions declared in YAML, imported at start
    pub subscriptions: Vec<serde_json::Map<String, serde_json::Value>>,
}

impl Default for SubscriptionHelperConfig {
    fn default() -> Self {
        Self {
            update_interval: 3600,
            target_resolution: TargetResolution::default(),
            subscriptions: Vec::new(),
        }
    }
}

impl Settings {
    /// Load `configuration.yaml` from the config directory.
    /// A missing file yields the defaults.
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref();
        let path = config_dir.join(CONFIG_FILE);

        if !path.exists() {
            info!("No {} in {:?}, using defaults", CONFIG_FILE, config_dir);
            return Ok(Self::default());
        }

        let value = load_yaml(config_dir, CONFIG_FILE)?;
        let settings = Self::from_yaml(value, &path)?;
        debug!(
            "Loaded settings: port {}, {} YAML subscriptions",
            settings.http.server_port,
            settings.subscription_helper.subscriptions.len()
        );
        Ok(settings)
    }

    /// Build settings from an already processed YAML document
    pub fn from_yaml(value: Value, path: &Path) -> ConfigResult<Self> {
        // An empty file parses as null
        if value.is_null() {
            return Ok(Self::default());
        }

        let settings: Self =
            serde_yaml::from_value(value).map_err(|e| ConfigError::ParseYaml {
                path: path.to_path_buf(),
                source: e,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.subscription_helper.update_interval == 0 {
            return Err(ConfigError::InvalidValue {
                key: "subscription_helper.update_interval".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load(dir.path()).unwrap();

        assert_eq!(settings.logger.default, "info");
        assert_eq!(settings.http.server_host, "0.0.0.0");
        assert_eq!(settings.http.server_port, 8123);
        assert_eq!(settings.subscription_helper.update_interval, 3600);
        assert_eq!(
            settings.subscription_helper.target_resolution,
            TargetResolution::EntryOrEntity
        );
        assert!(settings.subscription_helper.subscriptions.is_empty());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), CONFIG_FILE, "");

        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.http.server_port, 8123);
    }

    #[test]
    fn test_full_config() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "secrets.yaml", "netflix_account: N-42\n");
        write_file(
            dir.path(),
            CONFIG_FILE,
            r#"
logger:
  default: debug
http:
  server_port: 9123
subscription_helper:
  update_interval: 60
  target_resolution: entry_id_only
  subscriptions:
    - subscription_name: Netflix
      cost: 15.99
      end_date: 2026-12-01
      account_number: !secret netflix_account
"#,
        );

        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.logger.default, "debug");
        assert_eq!(settings.http.server_host, "0.0.0.0");
        assert_eq!(settings.http.server_port, 9123);

        let helper = &settings.subscription_helper;
        assert_eq!(helper.update_interval, 60);
        assert_eq!(helper.target_resolution, TargetResolution::EntryIdOnly);
        assert_eq!(helper.subscriptions.len(), 1);

        let netflix = &helper.subscriptions[0];
        assert_eq!(netflix["subscription_name"], "Netflix");
        assert_eq!(netflix["cost"], 15.99);
        assert_eq!(netflix["end_date"], "2026-12-01");
        assert_eq!(netflix["account_number"], "N-42");
    }

    #[test]
    fn test_zero_interval_rejected() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            CONFIG_FILE,
            "subscription_helper:\n  update_interval: 0\n",
        );

        let result = Settings::load(dir.path());
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            CONFIG_FILE,
            "subscription_helper:\n  target_resolution: whatever\n",
        );

        assert!(matches!(
            Settings::load(dir.path()),
            Err(ConfigError::ParseYaml { .. })
        ));
    }
}
