//! The `DebugMode` request object and the client that reads it and writes its
//! status.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// Identity of one request: `(namespace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    pub namespace: String,
    pub name: String,
}

impl RequestKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub generation: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugModeSpec {
    /// Requested level, parsed on every pass.
    pub target_log_level: String,
    /// End of the debug window.
    pub deactivate_timestamp: DateTime<Utc>,
}

/// Session phase, written only by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Set,
    WaitForRollback,
    Rollback,
    Completed,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Set => "Set",
            Phase::WaitForRollback => "WaitForRollback",
            Phase::Rollback => "Rollback",
            Phase::Completed => "Completed",
            Phase::Failed => "Failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// Every target runs at the requested level.
    LogLevelSet,
    /// Every target runs at its fallback level again.
    Deactivated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: bool,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        type_: ConditionType,
        status: bool,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            type_,
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: now,
        }
    }

    /// Equal in everything but the transition time.
    pub fn same_as(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugModeStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl DebugModeStatus {
    pub fn condition(&self, type_: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Insert or replace the condition of the same type.
    ///
    /// Returns `false` without touching anything when an identical condition is
    /// already present. The transition time only moves when the status flips.
    pub fn upsert_condition(&mut self, condition: Condition) -> bool {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            Some(existing) if existing.same_as(&condition) => false,
            Some(existing) => {
                let last_transition_time = if existing.status == condition.status {
                    existing.last_transition_time
                } else {
                    condition.last_transition_time
                };
                *existing = Condition {
                    last_transition_time,
                    ..condition
                };
                true
            }
            None => {
                self.conditions.push(condition);
                true
            }
        }
    }
}

/// A debug-mode request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugModeRequest {
    pub metadata: ObjectMeta,
    pub spec: DebugModeSpec,
    #[serde(default)]
    pub status: DebugModeStatus,
}

impl DebugModeRequest {
    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    /// Active iff `now` lies strictly before the deactivation timestamp.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.spec.deactivate_timestamp
    }
}

/// Reads requests and writes their status subresource.
#[async_trait]
pub trait DebugModeClient: Send + Sync {
    /// `Ok(None)` if the request does not exist (anymore).
    async fn get(&self, key: &RequestKey) -> Result<Option<DebugModeRequest>, BackendError>;

    async fn list(&self, namespace: &str) -> Result<Vec<DebugModeRequest>, BackendError>;

    /// Persist `request.status`, returning the stored object.
    async fn update_status(
        &self,
        request: &DebugModeRequest,
    ) -> Result<DebugModeRequest, BackendError>;
}
