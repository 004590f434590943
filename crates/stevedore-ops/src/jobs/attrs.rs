//! Attribute jobs: ownership, mode and security labels.

use std::path::{Path, PathBuf};

use stevedore_walk::{TreeVisitor, WalkFlow, WalkOptions, walk};

use stevedore_core::{ErrorCategory, Failure, ItemAttrs, OpsError};

use crate::job::{ItemOutcome, JobContext};
use crate::progress::TransferInfo;

use super::{report_transfer_progress, scan_sources};

/// Which attribute a job changes.
pub(crate) enum AttrOp {
    Mode(u32),
    Owner(u32),
    Group(u32),
    SecurityLabel(String),
    RestoreSecurityLabel,
}

impl AttrOp {
    fn title(&self) -> &'static str {
        match self {
            Self::Mode(_) => "Changing mode",
            Self::Owner(_) => "Changing owner",
            Self::Group(_) => "Changing group",
            Self::SecurityLabel(_) => "Changing security label",
            Self::RestoreSecurityLabel => "Restoring security label",
        }
    }

    fn apply(&self, ctx: &JobContext, path: &Path, follow_links: bool) -> Result<(), OpsError> {
        let result = match self {
            Self::Mode(mode) => ctx.store.set_mode(path, *mode, follow_links),
            Self::Owner(uid) => ctx.store.set_owner(path, *uid, follow_links),
            Self::Group(gid) => ctx.store.set_group(path, *gid, follow_links),
            Self::SecurityLabel(label) => ctx.store.set_security_label(path, label, follow_links),
            Self::RestoreSecurityLabel => ctx.store.restore_security_label(path, follow_links),
        };
        result.map_err(|e| Failure::io(path, ErrorCategory::Attribute, &e).into())
    }
}

pub(crate) fn run_set_attrs(
    ctx: &JobContext,
    paths: Vec<PathBuf>,
    recursive: bool,
    op: AttrOp,
) -> Result<(), OpsError> {
    let title = op.title();

    // Not every attribute applies to symlinks, so children are never
    // followed; only the outermost path may be.
    let options = WalkOptions {
        recursive,
        follow_root_links: true,
        follow_links: false,
    };

    let scan = scan_sources(ctx, &paths, options, title)?;
    let mut transfer = TransferInfo::new(&scan, None);

    for root in &paths {
        let mut visitor = AttrVisitor {
            ctx,
            op: &op,
            root,
            transfer: &mut transfer,
            title,
        };
        walk(ctx.store.as_ref(), root, options, &ctx.cancel, &mut visitor)?;
    }

    report_transfer_progress(ctx, &mut transfer, title, None, true);
    Ok(())
}

struct AttrVisitor<'a> {
    ctx: &'a JobContext,
    op: &'a AttrOp,
    root: &'a Path,
    transfer: &'a mut TransferInfo,
    title: &'a str,
}

impl AttrVisitor<'_> {
    fn apply(&mut self, path: &Path) -> Result<(), OpsError> {
        let ctx = self.ctx;
        let op = self.op;
        let follow_links = path == self.root;
        let outcome = ctx.with_retries(self.title, || op.apply(ctx, path, follow_links))?;
        match outcome {
            ItemOutcome::Done(()) => self.transfer.record_file_done(),
            // Byte accounting is meaningless for attribute changes.
            ItemOutcome::Skipped => self.transfer.skip_ignoring_size(),
        }
        report_transfer_progress(ctx, self.transfer, self.title, Some(path), false);
        Ok(())
    }
}

impl TreeVisitor for AttrVisitor<'_> {
    fn pre_visit_dir(&mut self, path: &Path, _attrs: &ItemAttrs) -> Result<WalkFlow, OpsError> {
        self.apply(path)?;
        Ok(WalkFlow::Continue)
    }

    fn visit_file(&mut self, path: &Path, _attrs: &ItemAttrs) -> Result<(), OpsError> {
        self.apply(path)
    }
}
