//! The job variants and their shared scan/transfer plumbing.

mod archive;
mod attrs;
mod copy;
mod create;
mod delete;
mod rename;
mod write;

pub use rename::validate_filename;

use std::path::{Path, PathBuf};

use stevedore_walk::{TreeVisitor, WalkFlow, WalkOptions, walk};

use stevedore_core::{ItemAttrs, OpsError};

use crate::job::{JobContext, JobSpec};
use crate::notify::Notification;
use crate::progress::{ScanInfo, TransferInfo};

/// Run a job to completion. Called on the job's blocking worker.
pub(crate) fn run(ctx: &JobContext, spec: JobSpec) -> Result<(), OpsError> {
    match spec {
        JobSpec::Copy {
            sources,
            target_dir,
        } => copy::run_copy(ctx, sources, target_dir),
        JobSpec::Move {
            sources,
            target_dir,
        } => copy::run_move(ctx, sources, target_dir),
        JobSpec::Delete { targets } => delete::run_delete(ctx, targets),
        JobSpec::Archive {
            sources,
            archive,
            format,
        } => archive::run_archive(ctx, sources, archive, format),
        JobSpec::Extract {
            archives,
            target_dir,
        } => archive::run_extract(ctx, archives, target_dir),
        JobSpec::CreateFile { path } => create::run_create(ctx, path, false),
        JobSpec::CreateDirectory { path } => create::run_create(ctx, path, true),
        JobSpec::Rename { path, new_name } => rename::run_rename(ctx, path, new_name),
        JobSpec::SetMode {
            paths,
            mode,
            recursive,
        } => attrs::run_set_attrs(ctx, paths, recursive, attrs::AttrOp::Mode(mode)),
        JobSpec::SetOwner {
            paths,
            uid,
            recursive,
        } => attrs::run_set_attrs(ctx, paths, recursive, attrs::AttrOp::Owner(uid)),
        JobSpec::SetGroup {
            paths,
            gid,
            recursive,
        } => attrs::run_set_attrs(ctx, paths, recursive, attrs::AttrOp::Group(gid)),
        JobSpec::SetSecurityLabel {
            paths,
            label,
            recursive,
        } => attrs::run_set_attrs(ctx, paths, recursive, attrs::AttrOp::SecurityLabel(label)),
        JobSpec::RestoreSecurityLabel { paths, recursive } => {
            attrs::run_set_attrs(ctx, paths, recursive, attrs::AttrOp::RestoreSecurityLabel)
        }
        JobSpec::Write {
            path,
            content,
            on_done,
        } => write::run_write(ctx, path, content, on_done),
    }
}

/// The scan pass: walk every source and tally the transfer baseline.
///
/// Unreadable entries are logged and skipped here; the transfer pass prompts
/// for them when it actually fails on them.
pub(crate) fn scan_sources(
    ctx: &JobContext,
    paths: &[PathBuf],
    options: WalkOptions,
    title: &str,
) -> Result<ScanInfo, OpsError> {
    let mut scan = ScanInfo::new();
    for path in paths {
        let mut visitor = ScanVisitor {
            ctx,
            scan: &mut scan,
            title,
        };
        walk(ctx.store.as_ref(), path, options, &ctx.cancel, &mut visitor)?;
    }
    post_scan_progress(ctx, &scan, title);
    Ok(scan)
}

struct ScanVisitor<'a> {
    ctx: &'a JobContext,
    scan: &'a mut ScanInfo,
    title: &'a str,
}

impl ScanVisitor<'_> {
    fn record(&mut self, attrs: &ItemAttrs) {
        self.scan.record(attrs);
        let config = &self.ctx.config;
        if self
            .scan
            .should_report(config.scan_report_interval, config.scan_report_batch)
        {
            post_scan_progress(self.ctx, self.scan, self.title);
        }
    }
}

impl TreeVisitor for ScanVisitor<'_> {
    fn pre_visit_dir(&mut self, _path: &Path, attrs: &ItemAttrs) -> Result<WalkFlow, OpsError> {
        self.record(attrs);
        Ok(WalkFlow::Continue)
    }

    fn visit_file(&mut self, _path: &Path, attrs: &ItemAttrs) -> Result<(), OpsError> {
        self.record(attrs);
        Ok(())
    }
}

pub(crate) fn post_scan_progress(ctx: &JobContext, scan: &ScanInfo, title: &str) {
    ctx.sink.post(Notification {
        job_id: ctx.id,
        title: title.to_string(),
        text: Some(format!("Preparing, {} items found", scan.files())),
        sub_text: None,
        progress_max: 0,
        progress_value: 0,
        indeterminate: true,
        cancelable: true,
    });
}

/// Post throttled transfer progress; `force` bypasses the throttle for the
/// final report.
pub(crate) fn report_transfer_progress(
    ctx: &JobContext,
    transfer: &mut TransferInfo,
    title: &str,
    current: Option<&Path>,
    force: bool,
) {
    if !force && !transfer.should_report(ctx.config.transfer_report_interval) {
        return;
    }
    let (progress_max, progress_value) = transfer.scaled_progress();
    ctx.sink.post(Notification {
        job_id: ctx.id,
        title: title.to_string(),
        text: current
            .and_then(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned()),
        sub_text: Some(format!(
            "{} / {} items",
            transfer.transferred_files(),
            transfer.files()
        )),
        progress_max,
        progress_value,
        indeterminate: progress_max == 0,
        cancelable: true,
    });
}

/// Count the items and bytes of a subtree, for bulk skip accounting.
pub(crate) fn subtree_totals(ctx: &JobContext, root: &Path) -> Result<(u64, u64), OpsError> {
    struct Tally {
        files: u64,
        bytes: u64,
    }

    impl TreeVisitor for Tally {
        fn pre_visit_dir(&mut self, _path: &Path, _attrs: &ItemAttrs) -> Result<WalkFlow, OpsError> {
            self.files += 1;
            Ok(WalkFlow::Continue)
        }

        fn visit_file(&mut self, _path: &Path, attrs: &ItemAttrs) -> Result<(), OpsError> {
            self.files += 1;
            self.bytes += attrs.transfer_size();
            Ok(())
        }
    }

    let mut tally = Tally { files: 0, bytes: 0 };
    walk(
        ctx.store.as_ref(),
        root,
        WalkOptions::default(),
        &ctx.cancel,
        &mut tally,
    )?;
    Ok((tally.files, tally.bytes))
}

/// Remove a skipped subtree from the transfer totals.
pub(crate) fn skip_subtree(
    ctx: &JobContext,
    transfer: &mut TransferInfo,
    root: &Path,
) -> Result<(), OpsError> {
    let (files, bytes) = subtree_totals(ctx, root)?;
    if files == 0 {
        // The subtree became unreadable after the scan; drop the one item the
        // scan saw.
        transfer.skip_ignoring_size();
    } else {
        transfer.skip_bulk(files, bytes);
    }
    Ok(())
}
