//! Job identity, parameters and the shared per-job run context.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use stevedore_core::{EngineConfig, ErrorCategory, Failure, FileStore, OpsError};

use crate::decision::{
    ActionAllInfo, ActionRequest, ConflictDecision, ConflictRequest, Decision, PendingDecision,
    Responder,
};
use crate::notify::NotificationSink;

/// Unique identity of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Output format of an archive job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
}

impl ArchiveFormat {
    /// Pick a format from the archive file name.
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Self::TarGz
        } else {
            Self::Tar
        }
    }
}

/// Completion callback of a write job.
pub type WriteCallback = Box<dyn FnOnce(bool) + Send>;

/// The immutable parameters of one user-requested operation.
pub enum JobSpec {
    Copy {
        sources: Vec<PathBuf>,
        target_dir: PathBuf,
    },
    Move {
        sources: Vec<PathBuf>,
        target_dir: PathBuf,
    },
    Delete {
        targets: Vec<PathBuf>,
    },
    Archive {
        sources: Vec<PathBuf>,
        archive: PathBuf,
        format: ArchiveFormat,
    },
    Extract {
        archives: Vec<PathBuf>,
        target_dir: PathBuf,
    },
    CreateFile {
        path: PathBuf,
    },
    CreateDirectory {
        path: PathBuf,
    },
    Rename {
        path: PathBuf,
        new_name: String,
    },
    SetMode {
        paths: Vec<PathBuf>,
        mode: u32,
        recursive: bool,
    },
    SetOwner {
        paths: Vec<PathBuf>,
        uid: u32,
        recursive: bool,
    },
    SetGroup {
        paths: Vec<PathBuf>,
        gid: u32,
        recursive: bool,
    },
    SetSecurityLabel {
        paths: Vec<PathBuf>,
        label: String,
        recursive: bool,
    },
    RestoreSecurityLabel {
        paths: Vec<PathBuf>,
        recursive: bool,
    },
    Write {
        path: PathBuf,
        content: Vec<u8>,
        on_done: Option<WriteCallback>,
    },
}

impl JobSpec {
    /// Stable name of the operation kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Copy { .. } => "copy",
            Self::Move { .. } => "move",
            Self::Delete { .. } => "delete",
            Self::Archive { .. } => "archive",
            Self::Extract { .. } => "extract",
            Self::CreateFile { .. } => "create-file",
            Self::CreateDirectory { .. } => "create-directory",
            Self::Rename { .. } => "rename",
            Self::SetMode { .. } => "set-mode",
            Self::SetOwner { .. } => "set-owner",
            Self::SetGroup { .. } => "set-group",
            Self::SetSecurityLabel { .. } => "set-security-label",
            Self::RestoreSecurityLabel { .. } => "restore-security-label",
            Self::Write { .. } => "write",
        }
    }
}

impl std::fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSpec").field("kind", &self.kind()).finish()
    }
}

/// Outcome of one item after the retry loop.
pub(crate) enum ItemOutcome<T> {
    Done(T),
    Skipped,
}

enum PendingReply {
    Action(mpsc::Sender<Decision>),
    Conflict(mpsc::Sender<ConflictDecision>),
}

/// Everything a running job needs: the store, the sink, the decision channel,
/// its cancellation token and its blanket choices.
///
/// Owned by the scheduler registry for the duration of the run; the
/// `ActionAllInfo` inside is scoped to this one invocation.
pub(crate) struct JobContext {
    pub id: JobId,
    pub store: Arc<dyn FileStore>,
    pub sink: Arc<dyn NotificationSink>,
    pub config: EngineConfig,
    pub cancel: CancellationToken,
    decisions: mpsc::UnboundedSender<PendingDecision>,
    action_all: Mutex<ActionAllInfo>,
    pending: Mutex<Option<PendingReply>>,
}

impl JobContext {
    pub(crate) fn new(
        id: JobId,
        store: Arc<dyn FileStore>,
        sink: Arc<dyn NotificationSink>,
        config: EngineConfig,
        decisions: mpsc::UnboundedSender<PendingDecision>,
    ) -> Self {
        Self {
            id,
            store,
            sink,
            config,
            cancel: CancellationToken::new(),
            decisions,
            action_all: Mutex::new(ActionAllInfo::default()),
            pending: Mutex::new(None),
        }
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), OpsError> {
        if self.cancel.is_cancelled() {
            Err(OpsError::Interrupted)
        } else {
            Ok(())
        }
    }

    pub(crate) fn flags(&self) -> std::sync::MutexGuard<'_, ActionAllInfo> {
        self.action_all.lock().unwrap()
    }

    /// Cancel this job: trip the token and unblock any decision wait.
    pub(crate) fn cancel_job(&self) {
        self.cancel.cancel();
        self.unblock_pending();
    }

    fn unblock_pending(&self) {
        let pending = self.pending.lock().unwrap().take();
        match pending {
            Some(PendingReply::Action(tx)) => {
                let _ = tx.try_send(Decision::Dismissed);
            }
            Some(PendingReply::Conflict(tx)) => {
                let _ = tx.try_send(ConflictDecision::Dismissed);
            }
            None => {}
        }
    }

    /// Ask the collaborator to resolve an error. Blocks the worker until the
    /// response arrives or the job is cancelled.
    pub(crate) fn ask_action(&self, request: ActionRequest) -> Result<Decision, OpsError> {
        let (tx, mut rx) = mpsc::channel(1);
        *self.pending.lock().unwrap() = Some(PendingReply::Action(tx.clone()));
        // The slot is registered before the cancellation check, so a cancel
        // racing this call either fails the check or fulfils the slot.
        if self.cancel.is_cancelled() {
            *self.pending.lock().unwrap() = None;
            return Err(OpsError::Interrupted);
        }

        let sent = self
            .decisions
            .send(PendingDecision::Action {
                request,
                reply: Responder::new(tx),
            })
            .is_ok();
        if !sent {
            *self.pending.lock().unwrap() = None;
            tracing::warn!(job = %self.id, "no decision provider attached, dismissing prompt");
            return Ok(Decision::Dismissed);
        }

        let decision = rx.blocking_recv().unwrap_or(Decision::Dismissed);
        *self.pending.lock().unwrap() = None;
        self.check_cancelled()?;
        Ok(decision)
    }

    /// Ask the collaborator to resolve a name conflict.
    pub(crate) fn ask_conflict(
        &self,
        request: ConflictRequest,
    ) -> Result<ConflictDecision, OpsError> {
        let (tx, mut rx) = mpsc::channel(1);
        *self.pending.lock().unwrap() = Some(PendingReply::Conflict(tx.clone()));
        if self.cancel.is_cancelled() {
            *self.pending.lock().unwrap() = None;
            return Err(OpsError::Interrupted);
        }

        let sent = self
            .decisions
            .send(PendingDecision::Conflict {
                request,
                reply: Responder::new(tx),
            })
            .is_ok();
        if !sent {
            *self.pending.lock().unwrap() = None;
            tracing::warn!(job = %self.id, "no decision provider attached, dismissing prompt");
            return Ok(ConflictDecision::Dismissed);
        }

        let decision = rx.blocking_recv().unwrap_or(ConflictDecision::Dismissed);
        *self.pending.lock().unwrap() = None;
        self.check_cancelled()?;
        Ok(decision)
    }

    /// Run `attempt` through the retry/skip/skip-all/cancel state machine.
    ///
    /// Cancellation passes straight through. A failure first consults the
    /// job's blanket flags, then prompts: retry loops the attempt, skip ends
    /// the item (optionally setting the blanket flag), cancel-category aborts
    /// the whole job, a dismissed dialog skips the single item. A remount
    /// re-prompts without retrying.
    pub(crate) fn with_retries<T>(
        &self,
        title: &str,
        mut attempt: impl FnMut() -> Result<T, OpsError>,
    ) -> Result<ItemOutcome<T>, OpsError> {
        loop {
            let failure = match attempt() {
                Ok(value) => return Ok(ItemOutcome::Done(value)),
                Err(OpsError::Interrupted) => return Err(OpsError::Interrupted),
                Err(OpsError::Failed(failure)) => failure,
            };

            if self.flags().is_skip_all(failure.category) {
                return Ok(ItemOutcome::Skipped);
            }

            match self.prompt_failure(title, &failure)? {
                PromptOutcome::Retry => continue,
                PromptOutcome::Skip => return Ok(ItemOutcome::Skipped),
            }
        }
    }

    /// Surface a structural hazard. Hazards are never retried: the outcome is
    /// always a skip unless the collaborator cancels the job.
    pub(crate) fn refuse_hazard(
        &self,
        path: &Path,
        category: ErrorCategory,
        message: String,
    ) -> Result<(), OpsError> {
        debug_assert!(category.is_hazard());
        if self.flags().is_skip_all(category) {
            return Ok(());
        }
        let failure = Failure::new(path, category, message);
        self.prompt_failure("Cannot proceed", &failure)?;
        Ok(())
    }

    fn prompt_failure(&self, title: &str, failure: &Failure) -> Result<PromptOutcome, OpsError> {
        let category = failure.category;
        let allow_retry = !category.is_hazard();
        // Prompt again after a remount; a successful remount does not retry
        // on its own.
        loop {
            let offer_remount = self.store.is_read_only(&failure.path)
                && self.store.supports_remount(&failure.path);
            let request = ActionRequest {
                job_id: self.id,
                title: title.to_string(),
                message: failure.to_string(),
                category,
                allow_retry,
                allow_apply_to_all: category != ErrorCategory::Other,
                offer_remount,
                positive_label: if allow_retry { "Retry" } else { "Skip" }.to_string(),
                negative_label: if allow_retry { "Skip" } else { "Cancel" }.to_string(),
                neutral_label: allow_retry.then(|| "Cancel".to_string()),
            };

            match self.ask_action(request)? {
                Decision::Retry if allow_retry => return Ok(PromptOutcome::Retry),
                Decision::Retry | Decision::Dismissed => return Ok(PromptOutcome::Skip),
                Decision::Skip { apply_to_all } => {
                    if apply_to_all {
                        self.flags().set_skip_all(category);
                    }
                    return Ok(PromptOutcome::Skip);
                }
                Decision::CancelCategory => {
                    self.cancel.cancel();
                    return Err(OpsError::Interrupted);
                }
                Decision::Remount => {
                    if let Err(error) = self.store.remount_read_write(&failure.path) {
                        tracing::warn!(job = %self.id, %error, "remount failed");
                    }
                }
            }
        }
    }
}

enum PromptOutcome {
    Retry,
    Skip,
}
