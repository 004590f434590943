//! The decision protocol.
//!
//! When a job hits a retryable error or a name conflict it sends a request to
//! the interactive collaborator and suspends its worker until exactly one
//! response arrives. Cancelling the job fulfils the outstanding reply slot so
//! the wait never hangs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use stevedore_core::ErrorCategory;

use crate::job::JobId;

/// Response to an error prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Attempt the failed operation again.
    Retry,
    /// Skip this item; with `apply_to_all`, every later item in the same
    /// category is skipped without prompting for the rest of the job.
    Skip { apply_to_all: bool },
    /// Abort the entire job.
    CancelCategory,
    /// Remount the read-only target store read-write. Does not retry; the
    /// prompt is shown again afterwards.
    Remount,
    /// The dialog was dismissed: skip this item only, no blanket flag.
    Dismissed,
}

/// Response to a name-conflict prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictDecision {
    /// Merge directories, or replace the existing file.
    MergeOrReplace { apply_to_all: bool },
    /// Retry against a new target name chosen by the collaborator.
    Rename { name: String },
    /// Skip this item.
    Skip { apply_to_all: bool },
    /// Abort the entire job.
    CancelJob,
    /// The dialog was dismissed: skip this item only.
    Dismissed,
}

/// Which transfer operation a conflict belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferOp {
    Copy,
    Move,
    Extract,
}

/// An error prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub job_id: JobId,
    pub title: String,
    pub message: String,
    pub category: ErrorCategory,
    /// Structural hazards cannot be retried.
    pub allow_retry: bool,
    pub allow_apply_to_all: bool,
    /// The target store is read-only and supports remounting.
    pub offer_remount: bool,
    pub positive_label: String,
    pub negative_label: String,
    pub neutral_label: Option<String>,
}

/// A name-conflict prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRequest {
    pub job_id: JobId,
    pub operation: TransferOp,
    pub source: PathBuf,
    pub target: PathBuf,
    pub source_is_dir: bool,
    pub target_is_dir: bool,
}

/// Single-use reply slot handed to the collaborator.
///
/// Dropping it without responding leaves the job suspended; cancelling the
/// job is the only way out of an unanswered prompt.
#[derive(Debug)]
pub struct Responder<T>(mpsc::Sender<T>);

impl<T> Responder<T> {
    pub(crate) fn new(tx: mpsc::Sender<T>) -> Self {
        Self(tx)
    }

    /// Deliver the collaborator's response. At most one response is
    /// observed; extra sends are ignored.
    pub fn respond(self, value: T) {
        let _ = self.0.try_send(value);
    }
}

/// A request waiting for the collaborator.
#[derive(Debug)]
pub enum PendingDecision {
    Action {
        request: ActionRequest,
        reply: Responder<Decision>,
    },
    Conflict {
        request: ConflictRequest,
        reply: Responder<ConflictDecision>,
    },
}

/// Per-job blanket choices, one flag per prompt category.
///
/// Scoped to a single job invocation and never persisted; once set, a flag
/// preempts further prompts of its category for the rest of the job.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionAllInfo {
    pub skip_transfer_errors: bool,
    pub skip_delete_errors: bool,
    pub skip_attribute_errors: bool,
    pub skip_self_contained: bool,
    pub skip_self_overwrite: bool,
    pub merge_all: bool,
    pub replace_all: bool,
    pub skip_all_conflicts: bool,
}

impl ActionAllInfo {
    /// Whether errors of `category` are blanket-skipped.
    pub fn is_skip_all(&self, category: ErrorCategory) -> bool {
        match category {
            ErrorCategory::Transfer => self.skip_transfer_errors,
            ErrorCategory::Delete => self.skip_delete_errors,
            ErrorCategory::Attribute => self.skip_attribute_errors,
            ErrorCategory::SelfContained => self.skip_self_contained,
            ErrorCategory::SelfOverwrite => self.skip_self_overwrite,
            ErrorCategory::Other => false,
        }
    }

    /// Set the blanket skip flag for `category`. `Other` has none.
    pub fn set_skip_all(&mut self, category: ErrorCategory) {
        match category {
            ErrorCategory::Transfer => self.skip_transfer_errors = true,
            ErrorCategory::Delete => self.skip_delete_errors = true,
            ErrorCategory::Attribute => self.skip_attribute_errors = true,
            ErrorCategory::SelfContained => self.skip_self_contained = true,
            ErrorCategory::SelfOverwrite => self.skip_self_overwrite = true,
            ErrorCategory::Other => {}
        }
    }
}
