//! Notification sink interface.

use serde::{Deserialize, Serialize};

use crate::job::JobId;

/// A progress notification for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub job_id: JobId,
    /// Short operation title, e.g. "Copying".
    pub title: String,
    /// Current item, when one is being processed.
    pub text: Option<String>,
    /// Secondary line, e.g. "3 / 12 items".
    pub sub_text: Option<String>,
    /// Progress denominator. Zero when unknown.
    pub progress_max: u64,
    /// Progress numerator.
    pub progress_value: u64,
    /// Whether progress is indeterminate (scan pass, single-item jobs).
    pub indeterminate: bool,
    /// Whether the collaborator should offer a cancel affordance.
    pub cancelable: bool,
}

/// Where job progress and completion are reported.
///
/// The engine posts at the throttled rates configured in `EngineConfig` and
/// dismisses once on completion. Implementations must be cheap; they are
/// called from job worker threads.
pub trait NotificationSink: Send + Sync {
    /// Post or update the notification for a job.
    fn post(&self, notification: Notification);

    /// Clear the notification for a finished job.
    fn dismiss(&self, job_id: JobId);

    /// Best-effort transient message, used for unexpected job failures.
    fn message(&self, job_id: JobId, text: &str);
}

/// A sink that drops everything. Useful for headless callers and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn post(&self, _notification: Notification) {}

    fn dismiss(&self, _job_id: JobId) {}

    fn message(&self, _job_id: JobId, _text: &str) {}
}
