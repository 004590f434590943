//! Archive and extract jobs (tar, optionally gzip-compressed).

use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::{Builder, EntryType, Header};

use stevedore_walk::{TreeVisitor, WalkFlow, WalkOptions, walk};

use stevedore_core::{ErrorCategory, Failure, FileType, ItemAttrs, OpsError};

use crate::decision::TransferOp;
use crate::job::{ArchiveFormat, ItemOutcome, JobContext};
use crate::progress::{ScanInfo, TransferInfo};

use super::copy::{ConflictOutcome, resolve_file_conflict};
use super::{post_scan_progress, report_transfer_progress, scan_sources};

const ARCHIVE_TITLE: &str = "Archiving";
const EXTRACT_TITLE: &str = "Extracting";

pub(crate) fn run_archive(
    ctx: &JobContext,
    sources: Vec<PathBuf>,
    archive: PathBuf,
    format: ArchiveFormat,
) -> Result<(), OpsError> {
    let scan = scan_sources(ctx, &sources, WalkOptions::default(), ARCHIVE_TITLE)?;
    let mut transfer = TransferInfo::new(&scan, Some(archive.clone()));

    let result = write_archive(ctx, &sources, &archive, format, &mut transfer);
    if result.is_err() {
        // Incomplete output is never left behind, cancellation included.
        if let Err(error) = ctx.store.remove_file(&archive) {
            tracing::warn!(archive = %archive.display(), %error, "failed to remove partial archive");
        }
        return result;
    }

    report_transfer_progress(ctx, &mut transfer, ARCHIVE_TITLE, None, true);
    Ok(())
}

fn write_archive(
    ctx: &JobContext,
    sources: &[PathBuf],
    archive: &Path,
    format: ArchiveFormat,
    transfer: &mut TransferInfo,
) -> Result<(), OpsError> {
    let writer = match ctx.with_retries(ARCHIVE_TITLE, || {
        ctx.store
            .open_write(archive)
            .map_err(|e| Failure::io(archive, ErrorCategory::Other, &e).into())
    })? {
        ItemOutcome::Done(writer) => writer,
        ItemOutcome::Skipped => return Ok(()),
    };

    match format {
        ArchiveFormat::Tar => {
            let mut builder = Builder::new(writer);
            append_sources(ctx, &mut builder, sources, transfer)?;
            builder
                .finish()
                .map_err(|e| archive_error(ctx, archive, &e))?;
        }
        ArchiveFormat::TarGz => {
            let encoder = GzEncoder::new(writer, Compression::default());
            let mut builder = Builder::new(encoder);
            append_sources(ctx, &mut builder, sources, transfer)?;
            let encoder = builder
                .into_inner()
                .map_err(|e| archive_error(ctx, archive, &e))?;
            encoder
                .finish()
                .map_err(|e| archive_error(ctx, archive, &e))?;
        }
    }
    Ok(())
}

fn append_sources<W: Write>(
    ctx: &JobContext,
    builder: &mut Builder<W>,
    sources: &[PathBuf],
    transfer: &mut TransferInfo,
) -> Result<(), OpsError> {
    for source in sources {
        // Entries are named relative to the source's parent.
        let root = source
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .to_path_buf();
        let mut visitor = ArchiveVisitor {
            ctx,
            builder,
            root,
            transfer,
        };
        walk(
            ctx.store.as_ref(),
            source,
            WalkOptions::default(),
            &ctx.cancel,
            &mut visitor,
        )?;
    }
    Ok(())
}

struct ArchiveVisitor<'a, W: Write> {
    ctx: &'a JobContext,
    builder: &'a mut Builder<W>,
    root: PathBuf,
    transfer: &'a mut TransferInfo,
}

impl<W: Write> ArchiveVisitor<'_, W> {
    fn entry_name(&self, path: &Path) -> Result<PathBuf, OpsError> {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .map_err(|_| {
                Failure::new(path, ErrorCategory::Other, "path escaped the archive root").into()
            })
    }

    fn header_for(attrs: &ItemAttrs, entry_type: EntryType) -> Header {
        let mut header = Header::new_gnu();
        header.set_entry_type(entry_type);
        header.set_size(if entry_type == EntryType::Directory {
            0
        } else {
            attrs.len
        });
        header.set_mode(attrs.mode.unwrap_or(0o644) & 0o7777);
        let mtime = attrs
            .modified
            .and_then(|at| at.duration_since(UNIX_EPOCH).ok())
            .map(|since| since.as_secs())
            .unwrap_or(0);
        header.set_mtime(mtime);
        header
    }
}

impl<W: Write> TreeVisitor for ArchiveVisitor<'_, W> {
    fn pre_visit_dir(&mut self, path: &Path, attrs: &ItemAttrs) -> Result<WalkFlow, OpsError> {
        let name = self.entry_name(path)?;
        let mut header = Self::header_for(attrs, EntryType::Directory);
        self.builder
            .append_data(&mut header, &name, io::empty())
            .map_err(|e| archive_error(self.ctx, path, &e))?;

        self.transfer.record_transferred(attrs);
        report_transfer_progress(self.ctx, self.transfer, ARCHIVE_TITLE, Some(path), false);
        Ok(WalkFlow::Continue)
    }

    fn visit_file(&mut self, path: &Path, attrs: &ItemAttrs) -> Result<(), OpsError> {
        let ctx = self.ctx;
        let name = self.entry_name(path)?;

        // Source reads prompt and may be skipped; that just omits the entry.
        let reader = match ctx.with_retries(ARCHIVE_TITLE, || {
            ctx.store
                .open_read(path)
                .map_err(|e| Failure::io(path, ErrorCategory::Transfer, &e).into())
        })? {
            ItemOutcome::Done(reader) => reader,
            ItemOutcome::Skipped => {
                self.transfer.skip(attrs);
                report_transfer_progress(ctx, self.transfer, ARCHIVE_TITLE, Some(path), false);
                return Ok(());
            }
        };

        let mut header = Self::header_for(attrs, EntryType::Regular);
        let reader = CancelReader {
            // Pin the data to the header size even if the file grows.
            inner: reader.take(attrs.len),
            ctx,
        };
        self.builder
            .append_data(&mut header, &name, reader)
            .map_err(|e| archive_error(ctx, path, &e))?;

        self.transfer.record_transferred(attrs);
        report_transfer_progress(ctx, self.transfer, ARCHIVE_TITLE, Some(path), false);
        Ok(())
    }
}

/// A writer-side archive failure aborts the job; cancellation observed while
/// streaming takes precedence.
fn archive_error(ctx: &JobContext, path: &Path, error: &io::Error) -> OpsError {
    if ctx.cancel.is_cancelled() {
        OpsError::Interrupted
    } else {
        Failure::io(path, ErrorCategory::Other, error).into()
    }
}

/// Makes a blocking read observe cancellation between chunks.
struct CancelReader<'a, R> {
    inner: R,
    ctx: &'a JobContext,
}

impl<R: Read> Read for CancelReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.ctx.cancel.is_cancelled() {
            return Err(io::Error::other("operation interrupted"));
        }
        self.inner.read(buf)
    }
}

pub(crate) fn run_extract(
    ctx: &JobContext,
    archives: Vec<PathBuf>,
    target_dir: PathBuf,
) -> Result<(), OpsError> {
    for archive in &archives {
        extract_one(ctx, archive, &target_dir)?;
    }
    Ok(())
}

fn extract_one(ctx: &JobContext, archive: &Path, target_dir: &Path) -> Result<(), OpsError> {
    let format = ArchiveFormat::from_path(archive);

    // Tar streams only read forward, so tally in a first pass and reopen for
    // the transfer pass.
    let mut scan = ScanInfo::new();
    visit_entries(ctx, archive, format, &mut |_entry, attrs| {
        scan.record(attrs);
        let config = &ctx.config;
        if scan.should_report(config.scan_report_interval, config.scan_report_batch) {
            post_scan_progress(ctx, &scan, EXTRACT_TITLE);
        }
        Ok(())
    })?;
    post_scan_progress(ctx, &scan, EXTRACT_TITLE);

    let mut transfer = TransferInfo::new(&scan, Some(target_dir.to_path_buf()));
    visit_entries(ctx, archive, format, &mut |entry, attrs| {
        extract_entry(ctx, archive, target_dir, entry, attrs, &mut transfer)
    })?;

    report_transfer_progress(ctx, &mut transfer, EXTRACT_TITLE, None, true);
    Ok(())
}

/// Iterate an archive's entries, calling `visit` with each entry and its
/// synthesized attributes.
fn visit_entries(
    ctx: &JobContext,
    archive: &Path,
    format: ArchiveFormat,
    visit: &mut dyn FnMut(&mut tar::Entry<'_, Box<dyn Read>>, &ItemAttrs) -> Result<(), OpsError>,
) -> Result<(), OpsError> {
    let raw = match ctx.with_retries(EXTRACT_TITLE, || {
        ctx.store
            .open_read(archive)
            .map_err(|e| Failure::io(archive, ErrorCategory::Transfer, &e).into())
    })? {
        ItemOutcome::Done(reader) => reader,
        ItemOutcome::Skipped => return Ok(()),
    };

    let reader: Box<dyn Read> = match format {
        ArchiveFormat::Tar => Box::new(raw),
        ArchiveFormat::TarGz => Box::new(GzDecoder::new(raw)),
    };
    let mut tar = tar::Archive::new(reader);
    let entries = tar
        .entries()
        .map_err(|e| Failure::io(archive, ErrorCategory::Other, &e))?;

    for entry in entries {
        ctx.check_cancelled()?;
        let mut entry = entry.map_err(|e| Failure::io(archive, ErrorCategory::Other, &e))?;

        let entry_type = entry.header().entry_type();
        let file_type = match entry_type {
            EntryType::Directory => FileType::Directory,
            EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => FileType::File,
            _ => {
                tracing::debug!(kind = ?entry_type, "skipping unsupported archive entry");
                continue;
            }
        };
        let attrs = ItemAttrs {
            len: entry.size(),
            file_type,
            modified: entry
                .header()
                .mtime()
                .ok()
                .map(|secs| UNIX_EPOCH + Duration::from_secs(secs)),
            mode: entry.header().mode().ok(),
        };

        visit(&mut entry, &attrs)?;
    }
    Ok(())
}

fn extract_entry(
    ctx: &JobContext,
    archive: &Path,
    target_dir: &Path,
    entry: &mut tar::Entry<'_, Box<dyn Read>>,
    attrs: &ItemAttrs,
    transfer: &mut TransferInfo,
) -> Result<(), OpsError> {
    let Some(relative) = sanitized_entry_path(entry) else {
        tracing::warn!(archive = %archive.display(), "skipping entry with unsafe path");
        transfer.skip(attrs);
        return Ok(());
    };
    let target = target_dir.join(&relative);

    // Writing over the archive being read is the one structural hazard here.
    if target == archive {
        ctx.refuse_hazard(
            archive,
            ErrorCategory::SelfOverwrite,
            format!("Cannot extract '{}' over itself", archive.display()),
        )?;
        transfer.skip(attrs);
        return Ok(());
    }

    if attrs.is_dir() {
        match ctx.with_retries(EXTRACT_TITLE, || ensure_dir(ctx, &target))? {
            ItemOutcome::Done(()) => transfer.record_transferred(attrs),
            ItemOutcome::Skipped => transfer.skip(attrs),
        }
        report_transfer_progress(ctx, transfer, EXTRACT_TITLE, Some(&target), false);
        return Ok(());
    }

    let (target, replace) = match resolve_file_conflict(ctx, TransferOp::Extract, &relative, target)?
    {
        ConflictOutcome::Proceed { target, replace } => (target, replace),
        ConflictOutcome::Skip => {
            transfer.skip(attrs);
            report_transfer_progress(ctx, transfer, EXTRACT_TITLE, Some(&relative), false);
            return Ok(());
        }
    };

    let mut first_attempt = true;
    let outcome = {
        let transfer = &mut *transfer;
        ctx.with_retries(EXTRACT_TITLE, || {
            if !first_attempt {
                // Entry data only streams forward; retrying cannot re-read it.
                return Err(Failure::new(
                    &target,
                    ErrorCategory::Transfer,
                    "archive stream cannot be rewound",
                )
                .into());
            }
            first_attempt = false;

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
            if let Some(parent) = target.parent() {
                ensure_dir(ctx, parent)?;
            }

            let mut writer = ctx
                .store
                .open_write(&target)
                .map_err(|e| Failure::io(&target, ErrorCategory::Transfer, &e))?;
            let mut buffer = vec![0u8; ctx.config.copy_buffer_size];
            let mut copied = 0u64;
            loop {
                if ctx.cancel.is_cancelled() {
                    transfer.rollback_transferred_size(copied);
                    return Err(OpsError::Interrupted);
                }
                let n = match entry.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(error) => {
                        transfer.rollback_transferred_size(copied);
                        return Err(Failure::io(&target, ErrorCategory::Transfer, &error).into());
                    }
                };
                if let Err(error) = writer.write_all(&buffer[..n]) {
                    transfer.rollback_transferred_size(copied);
                    return Err(Failure::io(&target, ErrorCategory::Transfer, &error).into());
                }
                copied += n as u64;
                transfer.add_transferred_size(n as u64);
                report_transfer_progress(ctx, transfer, EXTRACT_TITLE, Some(&target), false);
            }
            writer
                .flush()
                .map_err(|e| Failure::io(&target, ErrorCategory::Transfer, &e))?;
            Ok(())
        })?
    };

    match outcome {
        ItemOutcome::Done(()) => transfer.record_file_done(),
        ItemOutcome::Skipped => transfer.skip(attrs),
    }
    report_transfer_progress(ctx, transfer, EXTRACT_TITLE, None, false);
    Ok(())
}

/// Reject entry paths that would escape the extraction root.
fn sanitized_entry_path(entry: &tar::Entry<'_, Box<dyn Read>>) -> Option<PathBuf> {
    let path = entry.path().ok()?;
    if path.as_os_str().is_empty() {
        return None;
    }
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(clean)
}

/// Create a directory and any missing ancestors through the store.
fn ensure_dir(ctx: &JobContext, path: &Path) -> Result<(), OpsError> {
    if ctx.store.exists(path, true) {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(ctx, parent)?;
        }
    }
    match ctx.store.create_dir(path) {
        Ok(()) => Ok(()),
        // Lost a race; an existing directory is fine.
        Err(_) if ctx.store.exists(path, true) => Ok(()),
        Err(error) => Err(Failure::io(path, ErrorCategory::Transfer, &error).into()),
    }
}
