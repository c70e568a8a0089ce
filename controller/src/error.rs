//! Error types for the debug-mode reconciler.
//!
//! Every failure inside a pass is fatal for that pass and bubbles up to the
//! reconciler, which marks the request `Failed` and hands the error back to the
//! dispatcher. The category only drives logging and operator diagnostics; the
//! retry decision always belongs to the dispatcher.

use thiserror::Error;

use crate::fleet::TargetKind;

/// Reconciler result type alias
pub type Result<T> = std::result::Result<T, DebugModeError>;

/// Error category for structured logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A collaborator call (list/get/update/delete/restart) failed
    Transient,
    /// A level could not be parsed or a handler got a foreign target
    Data,
    /// The session invariants are broken (missing fallback, foreign state record)
    Consistency,
}

impl ErrorCategory {
    /// Machine-readable code for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "TRANSIENT_ERROR",
            Self::Data => "DATA_ERROR",
            Self::Consistency => "CONSISTENCY_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque error reported by a collaborator backend.
///
/// Not-found outcomes are not errors: backends report them as `Ok(None)` or
/// `Ok(false)` instead.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Reconciler error taxonomy
#[derive(Debug, Error)]
pub enum DebugModeError {
    #[error("failed to {action}: {source}")]
    Backend {
        action: String,
        #[source]
        source: BackendError,
    },

    #[error("invalid target log level {value:?}")]
    InvalidTargetLevel { value: String },

    #[error("invalid log level {value:?} for {subject}")]
    InvalidLevel { subject: String, value: String },

    #[error("{handler} handler cannot operate on {kind} target {name}")]
    KindMismatch {
        handler: TargetKind,
        kind: TargetKind,
        name: String,
    },

    #[error("no stored fallback log level for {key}")]
    MissingFallback { key: String },

    #[error("state record {namespace}/{record} is owned by {owner:?}, not {expected}")]
    ForeignStateRecord {
        namespace: String,
        record: String,
        owner: Option<String>,
        expected: String,
    },
}

impl DebugModeError {
    /// Wrap a collaborator failure with the action that was attempted.
    pub fn backend(action: impl Into<String>, source: BackendError) -> Self {
        Self::Backend {
            action: action.into(),
            source,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Backend { .. } => ErrorCategory::Transient,
            Self::InvalidTargetLevel { .. }
            | Self::InvalidLevel { .. }
            | Self::KindMismatch { .. } => ErrorCategory::Data,
            Self::MissingFallback { .. } | Self::ForeignStateRecord { .. } => {
                ErrorCategory::Consistency
            }
        }
    }
}
