//! File operations engine for stevedore.
//!
//! This crate runs user-requested file operations (copy, move, delete,
//! archive, extract, attribute changes, create, rename, write) as background
//! jobs. Each job performs a scan pass before mutating anything, reports
//! throttled progress through a [`NotificationSink`], and resolves conflicts
//! and errors through the synchronous decision protocol in [`decision`].

mod decision;
mod dupename;
mod job;
mod jobs;
mod notify;
mod progress;
mod scheduler;

pub use decision::{
    ActionAllInfo, ActionRequest, ConflictDecision, ConflictRequest, Decision, PendingDecision,
    Responder, TransferOp,
};
pub use dupename::{DuplicateCountInfo, find_count_suffix, next_available_name};
pub use job::{ArchiveFormat, JobId, JobSpec, WriteCallback};
pub use jobs::validate_filename;
pub use notify::{Notification, NotificationSink, NullSink};
pub use progress::{ScanInfo, TransferInfo};
pub use scheduler::JobScheduler;
