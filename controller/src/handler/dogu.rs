//! Dogu log levels live in the dogu config under `logging/root`; a new level
//! only takes effect after the dogu is restarted.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{TargetHandler, ensure_kind};
use crate::error::{BackendError, DebugModeError, Result};
use crate::fleet::{TargetIdentity, TargetKind};
use crate::loglevel::LogLevel;

/// Dogu config key holding the root log level.
pub const LOGGING_KEY: &str = "logging/root";

/// Level of a dogu whose config and descriptor both leave `logging/root` unset.
pub const DEFAULT_DOGU_LOG_LEVEL: LogLevel = LogLevel::Warn;

/// Key/value configuration of one dogu.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DoguConfig {
    pub dogu: String,
    #[serde(default)]
    pub entries: BTreeMap<String, String>,
}

/// One configuration field declared by a dogu descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationField {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Descriptor of the currently installed dogu version.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DoguDescriptor {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub configuration: Vec<ConfigurationField>,
}

impl DoguDescriptor {
    /// Declared default of the config field `key`, if any.
    pub fn default_for(&self, key: &str) -> Option<&str> {
        self.configuration
            .iter()
            .find(|field| field.name == key)
            .and_then(|field| field.default.as_deref())
    }
}

#[async_trait]
pub trait DoguConfigRepository: Send + Sync {
    async fn get(&self, dogu: &str) -> std::result::Result<DoguConfig, BackendError>;

    /// Persist `config`, returning the stored result.
    async fn update(&self, config: DoguConfig) -> std::result::Result<DoguConfig, BackendError>;
}

#[async_trait]
pub trait DoguDescriptorGetter: Send + Sync {
    /// Descriptor of the currently installed version of `dogu`.
    async fn get_current(&self, dogu: &str) -> std::result::Result<DoguDescriptor, BackendError>;
}

#[async_trait]
pub trait DoguRestarter: Send + Sync {
    /// Request a restart of `dogu`.
    async fn restart(&self, dogu: &str) -> std::result::Result<(), BackendError>;
}

/// [`TargetHandler`] for dogus.
#[derive(Clone)]
pub struct DoguLogLevelHandler {
    config: Arc<dyn DoguConfigRepository>,
    descriptors: Arc<dyn DoguDescriptorGetter>,
    restarter: Arc<dyn DoguRestarter>,
}

impl DoguLogLevelHandler {
    pub fn new(
        config: Arc<dyn DoguConfigRepository>,
        descriptors: Arc<dyn DoguDescriptorGetter>,
        restarter: Arc<dyn DoguRestarter>,
    ) -> Self {
        Self {
            config,
            descriptors,
            restarter,
        }
    }

    /// Build from one backend that provides all three dogu collaborators.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: DoguConfigRepository + DoguDescriptorGetter + DoguRestarter + 'static,
    {
        Self {
            config: Arc::clone(&backend) as Arc<dyn DoguConfigRepository>,
            descriptors: Arc::clone(&backend) as Arc<dyn DoguDescriptorGetter>,
            restarter: backend,
        }
    }

    async fn default_level(&self, dogu: &str) -> Result<LogLevel> {
        let descriptor = self.descriptors.get_current(dogu).await.map_err(|e| {
            DebugModeError::backend(format!("get descriptor of dogu {dogu}"), e)
        })?;

        match descriptor.default_for(LOGGING_KEY).filter(|v| !v.is_empty()) {
            Some(value) => parse_level(dogu, value),
            None => {
                tracing::debug!(
                    dogu,
                    default = %DEFAULT_DOGU_LOG_LEVEL,
                    "log level neither configured nor declared, using default"
                );
                Ok(DEFAULT_DOGU_LOG_LEVEL)
            }
        }
    }
}

fn parse_level(dogu: &str, value: &str) -> Result<LogLevel> {
    LogLevel::parse(value).map_err(|_| DebugModeError::InvalidLevel {
        subject: format!("dogu {dogu}"),
        value: value.to_string(),
    })
}

#[async_trait]
impl TargetHandler for DoguLogLevelHandler {
    fn kind(&self) -> TargetKind {
        TargetKind::Dogu
    }

    async fn get_level(&self, target: &TargetIdentity) -> Result<LogLevel> {
        ensure_kind(TargetKind::Dogu, target)?;
        let dogu = target.name.as_str();

        let config = self
            .config
            .get(dogu)
            .await
            .map_err(|e| DebugModeError::backend(format!("get config of dogu {dogu}"), e))?;

        match config.entries.get(LOGGING_KEY).filter(|v| !v.is_empty()) {
            Some(value) => parse_level(dogu, value),
            None => self.default_level(dogu).await,
        }
    }

    async fn set_level(&self, target: &TargetIdentity, level: LogLevel) -> Result<()> {
        ensure_kind(TargetKind::Dogu, target)?;
        let dogu = target.name.as_str();

        let mut config = self
            .config
            .get(dogu)
            .await
            .map_err(|e| DebugModeError::backend(format!("get config of dogu {dogu}"), e))?;
        config
            .entries
            .insert(LOGGING_KEY.to_string(), level.as_str().to_string());

        self.config.update(config).await.map_err(|e| {
            DebugModeError::backend(format!("write log level {level} for dogu {dogu}"), e)
        })?;
        tracing::debug!(dogu, %level, "written new log level");
        Ok(())
    }

    async fn restart_if_needed(&self, name: &str) -> Result<()> {
        self.restarter
            .restart(name)
            .await
            .map_err(|e| DebugModeError::backend(format!("restart dogu {name}"), e))
    }
}
