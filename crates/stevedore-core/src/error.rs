//! Error types for file operation jobs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while running a job.
///
/// Cancellation and failure travel on separate channels: `Interrupted` is a
/// control-flow signal that every walk and retry loop re-raises immediately,
/// while `Failed` carries a per-item failure that enters the decision
/// protocol.
#[derive(Debug, Error)]
pub enum OpsError {
    /// The job was cancelled.
    #[error("operation interrupted")]
    Interrupted,

    /// A per-item failure that may be retried or skipped.
    #[error(transparent)]
    Failed(#[from] Failure),
}

impl OpsError {
    /// Whether this is the cancellation signal.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

/// Prompt category of a failure.
///
/// Each category with a blanket "apply to all" choice maps to one flag in the
/// per-job `ActionAllInfo`; `Other` failures are always prompted one by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Copy/move/extract I/O failure.
    Transfer,
    /// Delete failure.
    Delete,
    /// Ownership/mode/security-label failure.
    Attribute,
    /// The target is inside the source ("copy into itself").
    SelfContained,
    /// The target is the source itself ("copy over itself").
    SelfOverwrite,
    /// Anything without a blanket choice (create, rename, write, archive).
    Other,
}

impl ErrorCategory {
    /// Structural hazards can only be skipped, never retried.
    pub fn is_hazard(&self) -> bool {
        matches!(self, Self::SelfContained | Self::SelfOverwrite)
    }
}

/// A retryable per-item failure.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{message}: {path}")]
pub struct Failure {
    /// The path that failed.
    pub path: PathBuf,
    /// Prompt category.
    pub category: ErrorCategory,
    /// Human-readable message.
    pub message: String,
}

impl Failure {
    /// Create a new failure.
    pub fn new(
        path: impl Into<PathBuf>,
        category: ErrorCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            category,
            message: message.into(),
        }
    }

    /// Wrap an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, category: ErrorCategory, source: &std::io::Error) -> Self {
        Self::new(path, category, source.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupted_is_not_a_failure() {
        let err = OpsError::Interrupted;
        assert!(err.is_interrupted());

        let err: OpsError = Failure::new("/tmp/x", ErrorCategory::Transfer, "denied").into();
        assert!(!err.is_interrupted());
    }

    #[test]
    fn test_hazard_categories() {
        assert!(ErrorCategory::SelfContained.is_hazard());
        assert!(ErrorCategory::SelfOverwrite.is_hazard());
        assert!(!ErrorCategory::Transfer.is_hazard());
        assert!(!ErrorCategory::Other.is_hazard());
    }

    #[test]
    fn test_failure_display() {
        let failure = Failure::new("/data/file.txt", ErrorCategory::Delete, "permission denied");
        assert_eq!(failure.to_string(), "permission denied: /data/file.txt");
    }
}
