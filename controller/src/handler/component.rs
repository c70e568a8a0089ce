//! Components carry their log level as the `mainLogLevel` mapped value; the
//! component operator rolls the change out by itself, so no restart is needed.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{TargetHandler, ensure_kind};
use crate::error::{BackendError, DebugModeError, Result};
use crate::fleet::{TargetIdentity, TargetKind};
use crate::loglevel::LogLevel;

/// Mapped value key holding a component's log level.
pub const MAPPED_LOG_LEVEL_KEY: &str = "mainLogLevel";

/// Level of a component without a `mainLogLevel` mapped value.
pub const DEFAULT_COMPONENT_LOG_LEVEL: LogLevel = LogLevel::Info;

/// The parts of a component resource this controller reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub name: String,
    #[serde(default)]
    pub mapped_values: BTreeMap<String, String>,
}

#[async_trait]
pub trait ComponentClient: Send + Sync {
    /// `Ok(None)` if the component does not exist.
    async fn get(&self, name: &str) -> std::result::Result<Option<Component>, BackendError>;

    async fn update(&self, component: Component) -> std::result::Result<Component, BackendError>;
}

/// [`TargetHandler`] for components.
#[derive(Clone)]
pub struct ComponentLogLevelHandler {
    client: Arc<dyn ComponentClient>,
}

impl ComponentLogLevelHandler {
    pub fn new(client: Arc<dyn ComponentClient>) -> Self {
        Self { client }
    }

    async fn fetch(&self, name: &str) -> Result<Component> {
        self.client
            .get(name)
            .await
            .map_err(|e| DebugModeError::backend(format!("get component {name}"), e))?
            .ok_or_else(|| {
                DebugModeError::backend(
                    format!("get component {name}"),
                    BackendError::new("component not found"),
                )
            })
    }
}

#[async_trait]
impl TargetHandler for ComponentLogLevelHandler {
    fn kind(&self) -> TargetKind {
        TargetKind::Component
    }

    async fn get_level(&self, target: &TargetIdentity) -> Result<LogLevel> {
        ensure_kind(TargetKind::Component, target)?;
        let component = self.fetch(&target.name).await?;

        match component.mapped_values.get(MAPPED_LOG_LEVEL_KEY) {
            Some(value) => LogLevel::parse(value).map_err(|_| DebugModeError::InvalidLevel {
                subject: format!("component {}", target.name),
                value: value.clone(),
            }),
            None => Ok(DEFAULT_COMPONENT_LOG_LEVEL),
        }
    }

    async fn set_level(&self, target: &TargetIdentity, level: LogLevel) -> Result<()> {
        ensure_kind(TargetKind::Component, target)?;
        let mut component = self.fetch(&target.name).await?;
        component.mapped_values.insert(
            MAPPED_LOG_LEVEL_KEY.to_string(),
            level.as_str().to_lowercase(),
        );

        self.client.update(component).await.map_err(|e| {
            DebugModeError::backend(
                format!("write log level {level} for component {}", target.name),
                e,
            )
        })?;
        Ok(())
    }

    async fn restart_if_needed(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}
