//! The job scheduler: registry, queueing and cancellation.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use stevedore_core::{EngineConfig, FileStore, OpsError};

use crate::decision::PendingDecision;
use crate::job::{ArchiveFormat, JobContext, JobId, JobSpec, WriteCallback};
use crate::jobs;
use crate::notify::NotificationSink;

/// Owns every running job and the queue of jobs submitted before the worker
/// context was ready.
///
/// Each started job occupies one blocking worker; the pool grows with demand
/// and is resource-limited, not job-count-limited. Constructed once per
/// process lifetime and torn down with [`shutdown`](Self::shutdown), which
/// force-cancels everything still running.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn FileStore>,
    sink: Arc<dyn NotificationSink>,
    config: EngineConfig,
    decisions: mpsc::UnboundedSender<PendingDecision>,
    next_id: AtomicU64,
    state: Mutex<State>,
}

struct State {
    runtime: Option<Handle>,
    queued: Vec<(JobId, JobSpec)>,
    running: HashMap<JobId, Arc<JobContext>>,
}

impl JobScheduler {
    /// Create a scheduler. The returned receiver carries the decision
    /// requests of all jobs; the interactive collaborator must consume it.
    pub fn new(
        store: Arc<dyn FileStore>,
        sink: Arc<dyn NotificationSink>,
        config: EngineConfig,
    ) -> (Self, mpsc::UnboundedReceiver<PendingDecision>) {
        let (decisions, requests) = mpsc::unbounded_channel();
        let scheduler = Self {
            inner: Arc::new(Inner {
                store,
                sink,
                config,
                decisions,
                next_id: AtomicU64::new(1),
                state: Mutex::new(State {
                    runtime: None,
                    queued: Vec::new(),
                    running: HashMap::new(),
                }),
            }),
        };
        (scheduler, requests)
    }

    /// Attach the worker context and drain every queued job.
    pub fn activate(&self, runtime: Handle) {
        let mut state = self.inner.state.lock().unwrap();
        state.runtime = Some(runtime);
        let queued = std::mem::take(&mut state.queued);
        for (id, spec) in queued {
            Inner::start_locked(&self.inner, &mut state, id, spec);
        }
    }

    /// Submit a job. Queued until [`activate`](Self::activate) has been
    /// called, started immediately afterwards. Fire-and-forget: progress and
    /// completion are observed through the notification sink.
    pub fn submit(&self, spec: JobSpec) -> JobId {
        let id = JobId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut state = self.inner.state.lock().unwrap();
        if state.runtime.is_some() {
            Inner::start_locked(&self.inner, &mut state, id, spec);
        } else {
            tracing::debug!(job = %id, kind = spec.kind(), "queueing job until activation");
            state.queued.push((id, spec));
        }
        id
    }

    /// Cancel a job by identity. A queued job is removed and never runs; a
    /// running one has its token tripped and any outstanding decision wait
    /// unblocked.
    pub fn cancel(&self, id: JobId) {
        let mut state = self.inner.state.lock().unwrap();
        if let Some(index) = state.queued.iter().position(|(queued_id, _)| *queued_id == id) {
            state.queued.remove(index);
            return;
        }
        if let Some(ctx) = state.running.get(&id) {
            tracing::debug!(job = %id, "cancelling running job");
            ctx.cancel_job();
        }
    }

    /// Number of currently executing jobs.
    pub fn running_count(&self) -> usize {
        self.inner.state.lock().unwrap().running.len()
    }

    /// Whether nothing is queued or running.
    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock().unwrap();
        state.queued.is_empty() && state.running.is_empty()
    }

    /// Wait until every submitted job has finished.
    pub async fn wait_idle(&self) {
        while !self.is_idle() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Tear down: drop the queue and force-cancel every running job.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.queued.clear();
        state.runtime = None;
        for ctx in state.running.values() {
            ctx.cancel_job();
        }
    }
}

/// The produced surface: one fire-and-forget operation per job kind.
impl JobScheduler {
    pub fn copy(&self, sources: Vec<PathBuf>, target_dir: PathBuf) -> JobId {
        self.submit(JobSpec::Copy { sources, target_dir })
    }

    pub fn move_to(&self, sources: Vec<PathBuf>, target_dir: PathBuf) -> JobId {
        self.submit(JobSpec::Move { sources, target_dir })
    }

    pub fn delete(&self, targets: Vec<PathBuf>) -> JobId {
        self.submit(JobSpec::Delete { targets })
    }

    pub fn archive(&self, sources: Vec<PathBuf>, archive: PathBuf) -> JobId {
        let format = ArchiveFormat::from_path(&archive);
        self.submit(JobSpec::Archive {
            sources,
            archive,
            format,
        })
    }

    pub fn extract(&self, archives: Vec<PathBuf>, target_dir: PathBuf) -> JobId {
        self.submit(JobSpec::Extract {
            archives,
            target_dir,
        })
    }

    pub fn create_file(&self, path: PathBuf) -> JobId {
        self.submit(JobSpec::CreateFile { path })
    }

    pub fn create_directory(&self, path: PathBuf) -> JobId {
        self.submit(JobSpec::CreateDirectory { path })
    }

    pub fn rename(&self, path: PathBuf, new_name: String) -> JobId {
        self.submit(JobSpec::Rename { path, new_name })
    }

    pub fn set_mode(&self, paths: Vec<PathBuf>, mode: u32, recursive: bool) -> JobId {
        self.submit(JobSpec::SetMode {
            paths,
            mode,
            recursive,
        })
    }

    pub fn set_owner(&self, paths: Vec<PathBuf>, uid: u32, recursive: bool) -> JobId {
        self.submit(JobSpec::SetOwner {
            paths,
            uid,
            recursive,
        })
    }

    pub fn set_group(&self, paths: Vec<PathBuf>, gid: u32, recursive: bool) -> JobId {
        self.submit(JobSpec::SetGroup {
            paths,
            gid,
            recursive,
        })
    }

    pub fn set_security_label(&self, paths: Vec<PathBuf>, label: String, recursive: bool) -> JobId {
        self.submit(JobSpec::SetSecurityLabel {
            paths,
            label,
            recursive,
        })
    }

    pub fn restore_security_label(&self, paths: Vec<PathBuf>, recursive: bool) -> JobId {
        self.submit(JobSpec::RestoreSecurityLabel { paths, recursive })
    }

    /// Write `content` to a single file. The optional callback reports
    /// success or failure once the job finishes.
    pub fn write(&self, path: PathBuf, content: Vec<u8>, on_done: Option<WriteCallback>) -> JobId {
        self.submit(JobSpec::Write {
            path,
            content,
            on_done,
        })
    }
}

impl Inner {
    /// Start a job on a blocking worker. Must be called with the state lock
    /// held and a runtime attached.
    fn start_locked(inner: &Arc<Inner>, state: &mut State, id: JobId, spec: JobSpec) {
        let Some(runtime) = state.runtime.clone() else {
            state.queued.push((id, spec));
            return;
        };

        let ctx = Arc::new(JobContext::new(
            id,
            inner.store.clone(),
            inner.sink.clone(),
            inner.config.clone(),
            inner.decisions.clone(),
        ));
        state.running.insert(id, ctx.clone());

        let kind = spec.kind();
        tracing::debug!(job = %id, kind, "starting job");

        let inner = inner.clone();
        runtime.spawn_blocking(move || {
            let result = catch_unwind(AssertUnwindSafe(|| jobs::run(&ctx, spec)));
            match result {
                Ok(Ok(())) => tracing::debug!(job = %id, kind, "job finished"),
                Ok(Err(OpsError::Interrupted)) => {
                    tracing::debug!(job = %id, kind, "job cancelled");
                }
                Ok(Err(OpsError::Failed(failure))) => {
                    tracing::error!(job = %id, kind, %failure, "job failed");
                    inner.sink.message(id, &failure.to_string());
                }
                Err(_panic) => {
                    tracing::error!(job = %id, kind, "job panicked");
                    inner.sink.message(id, "internal error");
                }
            }
            inner.sink.dismiss(id);
            // Self-removal synchronizes with concurrent cancellation through
            // the registry mutex.
            inner.state.lock().unwrap().running.remove(&id);
        });
    }
}
