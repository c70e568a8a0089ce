//! Operator configuration loading
//!
//! Loads configuration from `/etc/debugmode-operator/operator.toml` (or the
//! file named by `DEBUGMODE_OPERATOR_CONFIG`). `NAMESPACE` and `LOG_LEVEL`
//! override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use debugmode_controller::SELF_COMPONENT_NAME;
use serde::Deserialize;

/// Errors raised while loading or validating the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Root configuration of the operator binary
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace whose requests, dogus and components are managed
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Log level used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Component excluded from every session (the operator itself)
    #[serde(default = "default_self_component")]
    pub self_component: String,

    /// Delay between passes while targets are converging
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Period of the full request listing
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,

    /// Root directory of the local ecosystem backend
    #[serde(default = "default_ecosystem_root")]
    pub ecosystem_root: PathBuf,

    /// Retry delays after a failed pass
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_namespace() -> String {
    "ecosystem".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_self_component() -> String {
    SELF_COMPONENT_NAME.to_string()
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_resync_interval_secs() -> u64 {
    300
}

fn default_ecosystem_root() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("debugmode-operator").join("ecosystem"))
        .unwrap_or_else(|| PathBuf::from("ecosystem"))
}

/// Exponential backoff between failed passes of one request
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_min_delay_ms() -> u64 {
    5
}

fn default_max_delay_ms() -> u64 {
    300_000
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            log_level: default_log_level(),
            self_component: default_self_component(),
            poll_interval_secs: default_poll_interval_secs(),
            resync_interval_secs: default_resync_interval_secs(),
            ecosystem_root: default_ecosystem_root(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl OperatorConfig {
    /// Environment variable for config path override
    pub const ENV_CONFIG_PATH: &'static str = "DEBUGMODE_OPERATOR_CONFIG";

    /// Config file used when no override is set
    pub const DEFAULT_CONFIG_PATH: &'static str = "/etc/debugmode-operator/operator.toml";

    /// Namespace override
    pub const ENV_NAMESPACE: &'static str = "NAMESPACE";

    /// Log level override
    pub const ENV_LOG_LEVEL: &'static str = "LOG_LEVEL";

    /// Load configuration from file and environment
    ///
    /// Resolution order:
    /// 1. `DEBUGMODE_OPERATOR_CONFIG` environment variable
    /// 2. `/etc/debugmode-operator/operator.toml`
    ///
    /// A missing file yields the defaults; environment overrides apply either way.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|name| std::env::var(name).ok())
    }

    /// [`OperatorConfig::load`] with an injectable environment lookup.
    pub fn load_with(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let path = env(Self::ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_PATH));

        let mut config = if path.exists() {
            Self::read(&path)?
        } else {
            tracing::info!(path = %path.display(), "operator config not found, using defaults");
            Self::default()
        };

        config.apply_overrides(env);
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML string
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: OperatorConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(namespace) = env(Self::ENV_NAMESPACE).filter(|v| !v.is_empty()) {
            self.namespace = namespace;
        }
        if let Some(log_level) = env(Self::ENV_LOG_LEVEL).filter(|v| !v.is_empty()) {
            self.log_level = log_level;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "namespace",
                reason: "must not be empty".to_string(),
            });
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.resync_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "resync_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.backoff.min_delay_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "backoff.min_delay_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.backoff.min_delay_ms > self.backoff.max_delay_ms {
            return Err(ConfigError::Invalid {
                field: "backoff.min_delay_ms",
                reason: format!(
                    "{} exceeds backoff.max_delay_ms {}",
                    self.backoff.min_delay_ms, self.backoff.max_delay_ms
                ),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }
}
