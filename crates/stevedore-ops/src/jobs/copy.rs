//! Copy and move jobs.
//!
//! Both share one transfer visitor: move first attempts an atomic rename per
//! top-level source and, in the copy fallback, per subdirectory; sources are
//! deleted only after their descendants copied (post-visit).

use std::path::{Path, PathBuf};

use stevedore_walk::{TreeVisitor, WalkFlow, WalkOptions, walk};

use stevedore_core::{ErrorCategory, Failure, ItemAttrs, OpsError};

use crate::decision::{ConflictDecision, ConflictRequest, TransferOp};
use crate::dupename::next_available_name;
use crate::job::{ItemOutcome, JobContext};
use crate::progress::TransferInfo;

use super::{report_transfer_progress, scan_sources, skip_subtree, subtree_totals};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferKind {
    Copy,
    Move,
}

impl TransferKind {
    fn title(self) -> &'static str {
        match self {
            Self::Copy => "Copying",
            Self::Move => "Moving",
        }
    }

    fn op(self) -> TransferOp {
        match self {
            Self::Copy => TransferOp::Copy,
            Self::Move => TransferOp::Move,
        }
    }
}

pub(crate) fn run_copy(
    ctx: &JobContext,
    sources: Vec<PathBuf>,
    target_dir: PathBuf,
) -> Result<(), OpsError> {
    run_transfer(ctx, sources, target_dir, TransferKind::Copy)
}

pub(crate) fn run_move(
    ctx: &JobContext,
    sources: Vec<PathBuf>,
    target_dir: PathBuf,
) -> Result<(), OpsError> {
    // Atomic rename first; only failures fall back to scan+copy+delete.
    let mut remaining = Vec::new();
    for source in sources {
        ctx.check_cancelled()?;
        let Some(name) = source.file_name() else {
            remaining.push(source);
            continue;
        };
        let target = target_dir.join(name);
        if let Some((category, message)) = detect_hazard(&source, &target) {
            ctx.refuse_hazard(&source, category, message)?;
            continue;
        }
        if !ctx.store.exists(&target, false) && ctx.store.rename(&source, &target).is_ok() {
            tracing::debug!(source = %source.display(), "moved atomically");
            continue;
        }
        remaining.push(source);
    }

    if remaining.is_empty() {
        return Ok(());
    }
    run_transfer(ctx, remaining, target_dir, TransferKind::Move)
}

fn run_transfer(
    ctx: &JobContext,
    sources: Vec<PathBuf>,
    target_dir: PathBuf,
    kind: TransferKind,
) -> Result<(), OpsError> {
    let title = kind.title();
    let scan = scan_sources(ctx, &sources, WalkOptions::default(), title)?;
    let mut transfer = TransferInfo::new(&scan, Some(target_dir.clone()));

    for source in &sources {
        transfer_one(ctx, source, &target_dir, kind, &mut transfer)?;
    }

    report_transfer_progress(ctx, &mut transfer, title, None, true);
    Ok(())
}

fn transfer_one(
    ctx: &JobContext,
    source: &Path,
    target_dir: &Path,
    kind: TransferKind,
    transfer: &mut TransferInfo,
) -> Result<(), OpsError> {
    let title = kind.title();

    let Some(name) = source.file_name().map(|n| n.to_os_string()) else {
        let failure = Failure::new(source, ErrorCategory::Other, "source has no file name");
        match ctx.with_retries(title, || -> Result<(), OpsError> { Err(failure.clone().into()) })? {
            ItemOutcome::Done(()) | ItemOutcome::Skipped => {
                skip_subtree(ctx, transfer, source)?;
                return Ok(());
            }
        }
    };

    let source_attrs = match ctx.with_retries(title, || {
        ctx.store
            .attrs(source, true)
            .or_else(|_| ctx.store.attrs(source, false))
            .map_err(|e| Failure::io(source, ErrorCategory::Transfer, &e).into())
    })? {
        ItemOutcome::Done(attrs) => attrs,
        ItemOutcome::Skipped => {
            skip_subtree(ctx, transfer, source)?;
            return Ok(());
        }
    };

    let mut target = target_dir.join(&name);
    if kind == TransferKind::Copy && source.parent() == Some(target_dir) {
        // Copying into the containing directory: pick a free sibling name.
        if let Some(name) = name.to_str() {
            let resolved = next_available_name(
                ctx.store.as_ref(),
                target_dir,
                name,
                source_attrs.is_dir(),
                ctx.config.duplicate_name_probe_limit,
            );
            target = target_dir.join(resolved);
        }
    }

    if let Some((category, message)) = detect_hazard(source, &target) {
        ctx.refuse_hazard(source, category, message)?;
        skip_subtree(ctx, transfer, source)?;
        report_transfer_progress(ctx, transfer, title, Some(source), false);
        return Ok(());
    }

    let mut visitor = TransferVisitor {
        ctx,
        kind,
        title,
        source_root: source.to_path_buf(),
        target_root: target,
        transfer,
        mappings: Vec::new(),
    };
    walk(
        ctx.store.as_ref(),
        source,
        WalkOptions::default(),
        &ctx.cancel,
        &mut visitor,
    )
}

/// Detect a structural hazard between a source and its resolved target.
pub(crate) fn detect_hazard(source: &Path, target: &Path) -> Option<(ErrorCategory, String)> {
    if target == source {
        Some((
            ErrorCategory::SelfOverwrite,
            format!("Cannot transfer '{}' over itself", source.display()),
        ))
    } else if target.starts_with(source) {
        Some((
            ErrorCategory::SelfContained,
            format!("Cannot transfer '{}' into itself", source.display()),
        ))
    } else {
        None
    }
}

/// How a file-level name conflict resolved.
pub(crate) enum ConflictOutcome {
    Proceed { target: PathBuf, replace: bool },
    Skip,
}

/// Resolve a file-level name conflict against the blanket flags and, when
/// necessary, the collaborator.
pub(crate) fn resolve_file_conflict(
    ctx: &JobContext,
    op: TransferOp,
    source: &Path,
    mut target: PathBuf,
) -> Result<ConflictOutcome, OpsError> {
    let mut replace = false;
    while ctx.store.exists(&target, false) {
        if ctx.flags().replace_all {
            replace = true;
            break;
        }
        if ctx.flags().skip_all_conflicts {
            return Ok(ConflictOutcome::Skip);
        }

        let target_is_dir = ctx
            .store
            .attrs(&target, false)
            .map(|a| a.is_dir())
            .unwrap_or(false);
        let request = ConflictRequest {
            job_id: ctx.id,
            operation: op,
            source: source.to_path_buf(),
            target: target.clone(),
            source_is_dir: false,
            target_is_dir,
        };

        match ctx.ask_conflict(request)? {
            ConflictDecision::MergeOrReplace { apply_to_all } => {
                if apply_to_all {
                    ctx.flags().replace_all = true;
                }
                replace = true;
                break;
            }
            ConflictDecision::Rename { name } => {
                target = match target.parent() {
                    Some(parent) => parent.join(&name),
                    None => PathBuf::from(&name),
                };
            }
            ConflictDecision::Skip { apply_to_all } => {
                if apply_to_all {
                    ctx.flags().skip_all_conflicts = true;
                }
                return Ok(ConflictOutcome::Skip);
            }
            ConflictDecision::CancelJob => {
                ctx.cancel.cancel();
                return Err(OpsError::Interrupted);
            }
            ConflictDecision::Dismissed => return Ok(ConflictOutcome::Skip),
        }
    }
    Ok(ConflictOutcome::Proceed { target, replace })
}

/// Stream one file's contents, reporting each chunk.
pub(crate) fn copy_file_streamed(
    ctx: &JobContext,
    source: &Path,
    target: &Path,
    on_chunk: &mut dyn FnMut(u64),
) -> Result<(), OpsError> {
    let mut reader = ctx
        .store
        .open_read(source)
        .map_err(|e| Failure::io(source, ErrorCategory::Transfer, &e))?;
    let mut writer = ctx
        .store
        .open_write(target)
        .map_err(|e| Failure::io(target, ErrorCategory::Transfer, &e))?;

    let mut buffer = vec![0u8; ctx.config.copy_buffer_size];
    loop {
        ctx.check_cancelled()?;
        let n = reader
            .read(&mut buffer)
            .map_err(|e| Failure::io(source, ErrorCategory::Transfer, &e))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buffer[..n])
            .map_err(|e| Failure::io(target, ErrorCategory::Transfer, &e))?;
        on_chunk(n as u64);
    }
    writer
        .flush()
        .map_err(|e| Failure::io(target, ErrorCategory::Transfer, &e))?;
    Ok(())
}

struct TransferVisitor<'a> {
    ctx: &'a JobContext,
    kind: TransferKind,
    title: &'static str,
    source_root: PathBuf,
    target_root: PathBuf,
    transfer: &'a mut TransferInfo,
    /// Source-to-target directory mappings, innermost last. Conflict renames
    /// redirect whole subtrees through these.
    mappings: Vec<(PathBuf, PathBuf)>,
}

impl TransferVisitor<'_> {
    fn target_for(&self, path: &Path) -> Result<PathBuf, OpsError> {
        for (source_prefix, target_prefix) in self.mappings.iter().rev() {
            if let Ok(rel) = path.strip_prefix(source_prefix) {
                return Ok(target_prefix.join(rel));
            }
        }
        let rel = path
            .strip_prefix(&self.source_root)
            .map_err(|_| Failure::new(path, ErrorCategory::Other, "path escaped the walk root"))?;
        Ok(self.target_root.join(rel))
    }

    fn skip_dir(&mut self, path: &Path) -> Result<WalkFlow, OpsError> {
        skip_subtree(self.ctx, self.transfer, path)?;
        report_transfer_progress(self.ctx, self.transfer, self.title, Some(path), false);
        Ok(WalkFlow::SkipSubtree)
    }
}

impl TreeVisitor for TransferVisitor<'_> {
    fn pre_visit_dir(&mut self, path: &Path, attrs: &ItemAttrs) -> Result<WalkFlow, OpsError> {
        let ctx = self.ctx;
        let title = self.title;
        let mut target = self.target_for(path)?;

        // Move: whole subtrees rename atomically when the target is free.
        if self.kind == TransferKind::Move && !ctx.store.exists(&target, false) {
            let (files, bytes) = subtree_totals(ctx, path)?;
            if ctx.store.rename(path, &target).is_ok() {
                self.transfer.record_bulk(files, bytes);
                report_transfer_progress(ctx, self.transfer, title, Some(path), false);
                return Ok(WalkFlow::SkipSubtree);
            }
        }

        // Resolve a conflict on the target name.
        loop {
            let Ok(existing) = ctx.store.attrs(&target, false) else {
                break;
            };
            if existing.is_dir() && ctx.flags().merge_all {
                break;
            }
            if !existing.is_dir() && ctx.flags().replace_all {
                match ctx.with_retries(title, || {
                    ctx.store
                        .remove_file(&target)
                        .map_err(|e| Failure::io(&target, ErrorCategory::Transfer, &e).into())
                })? {
                    ItemOutcome::Done(()) => break,
                    ItemOutcome::Skipped => return self.skip_dir(path),
                }
            }
            if ctx.flags().skip_all_conflicts {
                return self.skip_dir(path);
            }

            let request = ConflictRequest {
                job_id: ctx.id,
                operation: self.kind.op(),
                source: path.to_path_buf(),
                target: target.clone(),
                source_is_dir: true,
                target_is_dir: existing.is_dir(),
            };
            match ctx.ask_conflict(request)? {
                ConflictDecision::MergeOrReplace { apply_to_all } => {
                    if existing.is_dir() {
                        // Directories merge; replacing never deletes a tree.
                        if apply_to_all {
                            ctx.flags().merge_all = true;
                        }
                        break;
                    }
                    if apply_to_all {
                        ctx.flags().replace_all = true;
                    }
                    match ctx.with_retries(title, || {
                        ctx.store
                            .remove_file(&target)
                            .map_err(|e| Failure::io(&target, ErrorCategory::Transfer, &e).into())
                    })? {
                        ItemOutcome::Done(()) => break,
                        ItemOutcome::Skipped => return self.skip_dir(path),
                    }
                }
                ConflictDecision::Rename { name } => {
                    target = match target.parent() {
                        Some(parent) => parent.join(&name),
                        None => PathBuf::from(&name),
                    };
                }
                ConflictDecision::Skip { apply_to_all } => {
                    if apply_to_all {
                        ctx.flags().skip_all_conflicts = true;
                    }
                    return self.skip_dir(path);
                }
                ConflictDecision::CancelJob => {
                    ctx.cancel.cancel();
                    return Err(OpsError::Interrupted);
                }
                ConflictDecision::Dismissed => return self.skip_dir(path),
            }
        }

        // Create the target directory unless merging into an existing one.
        if !ctx.store.exists(&target, false) {
            match ctx.with_retries(title, || {
                ctx.store
                    .create_dir(&target)
                    .map_err(|e| Failure::io(&target, ErrorCategory::Transfer, &e).into())
            })? {
                ItemOutcome::Done(()) => {}
                ItemOutcome::Skipped => return self.skip_dir(path),
            }
        }

        self.transfer.record_transferred(attrs);
        report_transfer_progress(ctx, self.transfer, title, Some(path), false);
        self.mappings.push((path.to_path_buf(), target));
        Ok(WalkFlow::Continue)
    }

    fn visit_file(&mut self, path: &Path, attrs: &ItemAttrs) -> Result<(), OpsError> {
        let ctx = self.ctx;
        let title = self.title;
        let kind = self.kind;
        let target = self.target_for(path)?;

        let (target, replace) =
            match resolve_file_conflict(ctx, kind.op(), path, target)? {
                ConflictOutcome::Proceed { target, replace } => (target, replace),
                ConflictOutcome::Skip => {
                    self.transfer.skip(attrs);
                    report_transfer_progress(ctx, self.transfer, title, Some(path), false);
                    return Ok(());
                }
            };

        let size = attrs.transfer_size();
        let transfer = &mut *self.transfer;
        let outcome = ctx.with_retries(title, || {
            if replace {
                if let Ok(existing) = ctx.store.attrs(&target, false) {
                    let removed = if existing.is_dir() {
                        ctx.store.remove_dir(&target)
                    } else {
                        ctx.store.remove_file(&target)
                    };
                    removed.map_err(|e| Failure::io(&target, ErrorCategory::Transfer, &e))?;
                }
            }

            if kind == TransferKind::Move && ctx.store.rename(path, &target).is_ok() {
                // Renamed without streaming; account the bytes afterwards.
                return Ok(size);
            }

            let mut copied = 0u64;
            let result = copy_file_streamed(ctx, path, &target, &mut |delta| {
                copied += delta;
                transfer.add_transferred_size(delta);
                report_transfer_progress(ctx, transfer, title, Some(path), false);
            });
            if let Err(error) = result {
                transfer.rollback_transferred_size(copied);
                return Err(error);
            }

            if kind == TransferKind::Move {
                ctx.store
                    .remove_file(path)
                    .map_err(|e| Failure::io(path, ErrorCategory::Transfer, &e))?;
            }
            Ok(0)
        })?;

        match outcome {
            ItemOutcome::Done(extra) => {
                transfer.add_transferred_size(extra);
                transfer.record_file_done();
            }
            ItemOutcome::Skipped => transfer.skip(attrs),
        }
        report_transfer_progress(ctx, transfer, title, Some(path), false);
        Ok(())
    }

    fn post_visit_dir(&mut self, path: &Path) -> Result<(), OpsError> {
        self.mappings.pop();
        if self.kind == TransferKind::Move {
            // Delete the source only after every descendant was handled.
            let ctx = self.ctx;
            ctx.with_retries(self.title, || {
                ctx.store
                    .remove_dir(path)
                    .map_err(|e| Failure::io(path, ErrorCategory::Transfer, &e).into())
            })?;
        }
        Ok(())
    }
}
