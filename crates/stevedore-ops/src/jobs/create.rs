//! Create jobs: new empty files and directories.

use std::path::PathBuf;

use stevedore_core::{ErrorCategory, Failure, OpsError};

use crate::job::{ItemOutcome, JobContext};
use crate::notify::Notification;

use super::rename::validate_filename;

pub(crate) fn run_create(ctx: &JobContext, path: PathBuf, directory: bool) -> Result<(), OpsError> {
    let title = if directory {
        "Creating directory"
    } else {
        "Creating file"
    };

    ctx.sink.post(Notification {
        job_id: ctx.id,
        title: title.to_string(),
        text: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
        sub_text: None,
        progress_max: 0,
        progress_value: 0,
        indeterminate: true,
        cancelable: true,
    });

    let outcome = ctx.with_retries(title, || {
        ctx.check_cancelled()?;
        if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
            if let Err(reason) = validate_filename(name) {
                return Err(Failure::new(&path, ErrorCategory::Other, reason).into());
            }
        }
        let created = if directory {
            ctx.store.create_dir(&path)
        } else {
            ctx.store.create_file(&path)
        };
        created.map_err(|e| Failure::io(&path, ErrorCategory::Other, &e).into())
    })?;

    match outcome {
        ItemOutcome::Done(()) => {
            tracing::debug!(path = %path.display(), directory, "created");
        }
        ItemOutcome::Skipped => {}
    }
    Ok(())
}
