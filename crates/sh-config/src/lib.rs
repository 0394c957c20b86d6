//! Configuration loading
//!
//! `configuration.yaml` in the config directory is read once at start. The
//! loader understands three custom tags:
//!
//! - `!include path` - Include another YAML file
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR` - Environment variable substitution
//!
//! # Example
//!
//! ```ignore
//! use sh_config::Settings;
//!
//! let settings = Settings::load("/config")?;
//! println!("{}", settings.http.server_port);
//! ```

mod error;
mod loader;
mod secrets;
mod settings;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};
pub use secrets::Secrets;
pub use settings::{
    HttpConfig, LoggerConfig, Settings, SubscriptionHelperConfig, TargetResolution,
    CONFIG_FILE,
};

pub use serde_yaml::Value;
