//! Per-kind log level capability adapters.
//!
//! The convergence engine only ever talks to `dyn TargetHandler`; each kind
//! (dogu, component) brings its own way of reading, writing and activating a
//! log level.

mod component;
mod dogu;

use async_trait::async_trait;

pub use component::{
    Component, ComponentClient, ComponentLogLevelHandler, DEFAULT_COMPONENT_LOG_LEVEL,
    MAPPED_LOG_LEVEL_KEY,
};
pub use dogu::{
    ConfigurationField, DEFAULT_DOGU_LOG_LEVEL, DoguConfig, DoguConfigRepository, DoguDescriptor,
    DoguDescriptorGetter, DoguLogLevelHandler, DoguRestarter, LOGGING_KEY,
};

use crate::error::{DebugModeError, Result};
use crate::fleet::{TargetIdentity, TargetKind};
use crate::loglevel::LogLevel;

/// Capability interface implemented once per target kind.
#[async_trait]
pub trait TargetHandler: Send + Sync {
    /// Stable discriminator of the kind this handler manages.
    fn kind(&self) -> TargetKind;

    /// Current effective level. An unset level resolves to the kind's
    /// default, never to [`LogLevel::Unknown`].
    async fn get_level(&self, target: &TargetIdentity) -> Result<LogLevel>;

    /// Write `level`. A single attempt; retries belong to the dispatcher.
    async fn set_level(&self, target: &TargetIdentity, level: LogLevel) -> Result<()>;

    /// Make a written level take effect. No-op for kinds that apply it live.
    async fn restart_if_needed(&self, name: &str) -> Result<()>;
}

/// Reject targets of a kind the handler does not manage.
pub(crate) fn ensure_kind(handler: TargetKind, target: &TargetIdentity) -> Result<()> {
    if target.kind == handler {
        Ok(())
    } else {
        Err(DebugModeError::KindMismatch {
            handler,
            kind: target.kind,
            name: target.name.clone(),
        })
    }
}
