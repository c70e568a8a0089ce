//! `debugmode-controller`: level-triggered debug-mode reconciler.
//!
//! A `DebugMode` request asks for every managed target (dogus and components)
//! to run at a given log level until a deadline, after which the original
//! levels are restored. Each reconciliation pass re-derives the direction from
//! the wall clock, converges the whole fleet once and returns a
//! [`Requeue`] directive to the surrounding dispatcher.
//!
//! ## Layers
//! - [`loglevel`]: the `LogLevel` value type
//! - [`handler`]: per-kind capability adapters (`DoguLogLevelHandler`,
//!   `ComponentLogLevelHandler`) behind the `TargetHandler` trait
//! - [`fleet`]: fresh enumeration of all targets of all kinds
//! - [`state_store`]: durable fallback levels, one record per session
//! - [`convergence`]: the per-target compare/capture/write loop
//! - [`reconciler`]: the phase state machine
//!
//! Collaborators (request client, record backend, target backends) are traits;
//! [`memory`] provides in-memory implementations used by tests and dry runs.

pub mod clock;
pub mod convergence;
pub mod error;
pub mod fleet;
pub mod handler;
pub mod loglevel;
pub mod memory;
pub mod reconciler;
pub mod request;
pub mod state_store;

pub use clock::{Clock, SystemClock};
pub use convergence::{ConvergenceEngine, Direction};
pub use error::{BackendError, DebugModeError, ErrorCategory, Result};
pub use fleet::{Fleet, FleetMember, TargetIdentity, TargetKind, TargetLister};
pub use handler::{ComponentLogLevelHandler, DoguLogLevelHandler, TargetHandler};
pub use loglevel::{LogLevel, ParseLogLevelError};
pub use reconciler::{DebugModeReconciler, Requeue};
pub use request::{
    Condition, ConditionType, DebugModeClient, DebugModeRequest, DebugModeSpec, DebugModeStatus,
    ObjectMeta, Phase, RequestKey,
};
pub use state_store::{RecordBackend, StateRecord, StateStore};

/// Name of the operator's own component; never debugged by itself.
pub const SELF_COMPONENT_NAME: &str = "k8s-debug-mode-operator";

/// Default delay between passes while targets are still converging.
pub const DEFAULT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);
