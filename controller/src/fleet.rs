//! Target identities and fresh per-pass enumeration of the managed fleet.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, DebugModeError, Result};
use crate::handler::TargetHandler;

/// Kind of managed resource whose log level can be changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Dogu,
    Component,
}

impl TargetKind {
    /// Stable discriminator, also used as the state key prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Dogu => "dogu",
            TargetKind::Component => "component",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One managed target: `(kind, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetIdentity {
    pub kind: TargetKind,
    pub name: String,
}

impl TargetIdentity {
    pub fn new(kind: TargetKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Key of this target's fallback entry: `"{kind}.{name}"`.
    pub fn state_key(&self) -> String {
        format!("{}.{}", self.kind, self.name)
    }
}

impl fmt::Display for TargetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

/// Lists the names of all targets of one kind.
///
/// An empty list is a legitimate answer.
#[async_trait]
pub trait TargetLister: Send + Sync {
    async fn list(&self) -> std::result::Result<Vec<String>, BackendError>;
}

/// A handler paired with the listing of the targets it manages.
#[derive(Clone)]
pub struct FleetMember {
    handler: Arc<dyn TargetHandler>,
    lister: Arc<dyn TargetLister>,
    excluded: Vec<String>,
}

impl FleetMember {
    pub fn new(handler: Arc<dyn TargetHandler>, lister: Arc<dyn TargetLister>) -> Self {
        Self {
            handler,
            lister,
            excluded: Vec::new(),
        }
    }

    /// Skip the target called `name` during enumeration.
    pub fn excluding(mut self, name: impl Into<String>) -> Self {
        self.excluded.push(name.into());
        self
    }

    pub fn kind(&self) -> TargetKind {
        self.handler.kind()
    }
}

/// All targets of one kind as seen by one pass.
#[derive(Clone)]
pub struct EnumeratedKind {
    pub handler: Arc<dyn TargetHandler>,
    pub targets: Vec<TargetIdentity>,
}

/// The heterogeneous set of target kinds a session applies to.
///
/// Enumeration order is member order, then listing order.
#[derive(Clone, Default)]
pub struct Fleet {
    members: Vec<FleetMember>,
}

impl Fleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_member(mut self, member: FleetMember) -> Self {
        self.members.push(member);
        self
    }

    /// List every kind afresh. Nothing is cached between passes.
    pub async fn enumerate(&self) -> Result<Vec<EnumeratedKind>> {
        let mut enumerated = Vec::with_capacity(self.members.len());
        for member in &self.members {
            let kind = member.kind();
            let names = member
                .lister
                .list()
                .await
                .map_err(|e| DebugModeError::backend(format!("list {kind}s"), e))?;

            let targets: Vec<TargetIdentity> = names
                .into_iter()
                .filter(|name| !member.excluded.contains(name))
                .map(|name| TargetIdentity::new(kind, name))
                .collect();
            tracing::debug!(%kind, count = targets.len(), "enumerated targets");

            enumerated.push(EnumeratedKind {
                handler: Arc::clone(&member.handler),
                targets,
            });
        }
        Ok(enumerated)
    }
}
