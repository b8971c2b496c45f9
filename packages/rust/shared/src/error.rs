//! Error types for ContentFlow.
//!
//! Library crates use [`ContentFlowError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::WorkflowState;

/// Top-level error type for all ContentFlow operations.
#[derive(Debug, thiserror::Error)]
pub enum ContentFlowError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Issue-tracker communication error.
    ///
    /// `transient` marks network/timeout class failures that may be retried.
    #[error("tracker error{}: {message}", if *.transient { " (transient)" } else { "" })]
    Tracker { message: String, transient: bool },

    /// The tracker refused (or never offered) a workflow transition.
    #[error("transition of {key} to {target} rejected: {reason}")]
    TransitionRejected {
        key: String,
        target: WorkflowState,
        reason: String,
    },

    /// The content store text could not be parsed.
    #[error("store parse error: {message}")]
    StoreParse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (invalid timestamps, bad task payloads, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Checkpoint database error.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ContentFlowError>;

impl ContentFlowError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a store parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::StoreParse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Tracker failure worth retrying (connection reset, timeout, 5xx, 429).
    pub fn tracker_transient(msg: impl Into<String>) -> Self {
        Self::Tracker {
            message: msg.into(),
            transient: true,
        }
    }

    /// Tracker failure that will not go away on retry.
    pub fn tracker_permanent(msg: impl Into<String>) -> Self {
        Self::Tracker {
            message: msg.into(),
            transient: false,
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a retry policy may attempt the failed operation again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Tracker {
                transient: true,
                ..
            }
        )
    }
}
