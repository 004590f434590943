//! Delete job: files first, then the emptied directories in post-order.

use std::path::{Path, PathBuf};

use stevedore_walk::{TreeVisitor, WalkFlow, WalkOptions, walk};

use stevedore_core::{ErrorCategory, Failure, ItemAttrs, OpsError};

use crate::job::{ItemOutcome, JobContext};
use crate::progress::TransferInfo;

use super::{report_transfer_progress, scan_sources};

const TITLE: &str = "Deleting";

pub(crate) fn run_delete(ctx: &JobContext, targets: Vec<PathBuf>) -> Result<(), OpsError> {
    // Symlinks are deleted, never followed.
    let options = WalkOptions {
        recursive: true,
        follow_root_links: false,
        follow_links: false,
    };

    let scan = scan_sources(ctx, &targets, options, TITLE)?;
    let mut transfer = TransferInfo::new(&scan, None);

    for target in &targets {
        let mut visitor = DeleteVisitor {
            ctx,
            transfer: &mut transfer,
        };
        walk(ctx.store.as_ref(), target, options, &ctx.cancel, &mut visitor)?;
    }

    report_transfer_progress(ctx, &mut transfer, TITLE, None, true);
    Ok(())
}

struct DeleteVisitor<'a> {
    ctx: &'a JobContext,
    transfer: &'a mut TransferInfo,
}

impl TreeVisitor for DeleteVisitor<'_> {
    fn pre_visit_dir(&mut self, _path: &Path, _attrs: &ItemAttrs) -> Result<WalkFlow, OpsError> {
        Ok(WalkFlow::Continue)
    }

    fn visit_file(&mut self, path: &Path, attrs: &ItemAttrs) -> Result<(), OpsError> {
        let ctx = self.ctx;
        let outcome = ctx.with_retries(TITLE, || {
            ctx.store
                .remove_file(path)
                .map_err(|e| Failure::io(path, ErrorCategory::Delete, &e).into())
        })?;
        match outcome {
            ItemOutcome::Done(()) => self.transfer.record_transferred(attrs),
            ItemOutcome::Skipped => self.transfer.skip(attrs),
        }
        report_transfer_progress(ctx, self.transfer, TITLE, Some(path), false);
        Ok(())
    }

    fn post_visit_dir(&mut self, path: &Path) -> Result<(), OpsError> {
        let ctx = self.ctx;
        // Fails when a child was skipped; the prompt lets the user skip the
        // directory too.
        let outcome = ctx.with_retries(TITLE, || {
            ctx.store
                .remove_dir(path)
                .map_err(|e| Failure::io(path, ErrorCategory::Delete, &e).into())
        })?;
        match outcome {
            ItemOutcome::Done(()) => self.transfer.record_file_done(),
            ItemOutcome::Skipped => self.transfer.skip_ignoring_size(),
        }
        report_transfer_progress(ctx, self.transfer, TITLE, Some(path), false);
        Ok(())
    }
}
