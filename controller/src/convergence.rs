//! One convergence sweep over every target of every kind.

use crate::error::{DebugModeError, Result};
use crate::fleet::{EnumeratedKind, TargetIdentity};
use crate::handler::TargetHandler;
use crate::loglevel::LogLevel;
use crate::state_store::StateStore;

/// Which level a sweep drives targets toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Toward the requested level, capturing fallbacks on first sight.
    Activate { target: LogLevel },
    /// Back toward each target's stored fallback.
    Deactivate,
}

/// Compares observed against desired levels and writes the difference.
///
/// The first failing target aborts the sweep; targets already handled keep
/// their new level and fallback entry.
#[derive(Debug, Clone, Copy)]
pub struct ConvergenceEngine {
    direction: Direction,
}

impl ConvergenceEngine {
    pub fn new(direction: Direction) -> Self {
        Self { direction }
    }

    /// Run one sweep. Returns whether any target was written.
    pub async fn run(&self, kinds: &[EnumeratedKind], store: &mut StateStore) -> Result<bool> {
        let mut changed = false;
        for kind in kinds {
            for target in &kind.targets {
                if self
                    .converge_target(kind.handler.as_ref(), target, store)
                    .await?
                {
                    changed = true;
                }
            }
        }
        Ok(changed)
    }

    async fn converge_target(
        &self,
        handler: &dyn TargetHandler,
        target: &TargetIdentity,
        store: &mut StateStore,
    ) -> Result<bool> {
        let current = handler.get_level(target).await?;
        let key = target.state_key();

        let desired = match self.direction {
            Direction::Activate { target: level } => {
                if store.get(&key).is_none() {
                    store.put(&key, current.as_str()).await?;
                }
                level
            }
            Direction::Deactivate => stored_fallback(store, &key)?,
        };

        if current == desired {
            tracing::trace!(%target, level = %current, "already converged");
            return Ok(false);
        }

        tracing::info!(%target, from = %current, to = %desired, "changing log level");
        handler.set_level(target, desired).await?;
        handler.restart_if_needed(&target.name).await?;
        Ok(true)
    }
}

fn stored_fallback(store: &StateStore, key: &str) -> Result<LogLevel> {
    let value = store
        .get(key)
        .ok_or_else(|| DebugModeError::MissingFallback {
            key: key.to_string(),
        })?;
    LogLevel::parse(value).map_err(|_| DebugModeError::InvalidLevel {
        subject: format!("stored fallback {key}"),
        value: value.to_string(),
    })
}
