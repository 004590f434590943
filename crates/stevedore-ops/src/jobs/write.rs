//! Write job: single-file content write, retryable as a whole.

use std::io::Write;
use std::path::PathBuf;

use stevedore_core::{ErrorCategory, Failure, OpsError};

use crate::job::{ItemOutcome, JobContext, WriteCallback};
use crate::notify::Notification;

const TITLE: &str = "Writing";

pub(crate) fn run_write(
    ctx: &JobContext,
    path: PathBuf,
    content: Vec<u8>,
    on_done: Option<WriteCallback>,
) -> Result<(), OpsError> {
    ctx.sink.post(Notification {
        job_id: ctx.id,
        title: TITLE.to_string(),
        text: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
        sub_text: None,
        progress_max: 0,
        progress_value: 0,
        indeterminate: true,
        cancelable: true,
    });

    // Each attempt rewrites the file from scratch.
    let result = ctx.with_retries(TITLE, || {
        ctx.check_cancelled()?;
        let mut writer = ctx
            .store
            .open_write(&path)
            .map_err(|e| Failure::io(&path, ErrorCategory::Other, &e))?;
        writer
            .write_all(&content)
            .map_err(|e| Failure::io(&path, ErrorCategory::Other, &e))?;
        writer
            .flush()
            .map_err(|e| Failure::io(&path, ErrorCategory::Other, &e))?;
        Ok(())
    });

    let success = matches!(&result, Ok(ItemOutcome::Done(())));
    if let Some(on_done) = on_done {
        on_done(success);
    }
    result.map(|_| ())
}
