//! stevedore - background file-operation engine.
//!
//! Usage:
//!   stevedore cp SOURCE... DEST       Copy into a directory
//!   stevedore mv SOURCE... DEST       Move into a directory
//!   stevedore rm PATH...              Delete permanently
//!   stevedore archive SOURCE... OUT   Pack into a tar / tar.gz archive
//!   stevedore extract ARCHIVE... DEST Unpack archives
//!   stevedore --help                  Show help

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, bail};
use tracing_subscriber::EnvFilter;

use stevedore_core::{EngineConfig, LocalStore};
use stevedore_ops::{
    ConflictDecision, Decision, JobId, JobScheduler, Notification, NotificationSink,
    PendingDecision,
};

#[derive(Parser)]
#[command(
    name = "stevedore",
    version,
    about = "Background file-operation engine",
    long_about = "stevedore runs file operations the way a file manager's \
                  background engine does: scan first, then transfer with \
                  progress, resolving conflicts by policy."
)]
struct Cli {
    /// What to do when a target name already exists.
    #[arg(long, value_enum, default_value = "skip", global = true)]
    on_conflict: ConflictPolicy,

    /// What to do when an item fails.
    #[arg(long, value_enum, default_value = "skip", global = true)]
    on_error: ErrorPolicy,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy sources into a target directory (last path).
    Cp {
        /// Source paths followed by the target directory.
        #[arg(required = true, num_args = 2..)]
        paths: Vec<PathBuf>,
    },

    /// Move sources into a target directory (last path).
    Mv {
        /// Source paths followed by the target directory.
        #[arg(required = true, num_args = 2..)]
        paths: Vec<PathBuf>,
    },

    /// Delete paths permanently.
    Rm {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Pack sources into an archive (last path; .tar or .tar.gz).
    Archive {
        /// Source paths followed by the archive to create.
        #[arg(required = true, num_args = 2..)]
        paths: Vec<PathBuf>,
    },

    /// Unpack archives into a target directory (last path).
    Extract {
        /// Archives followed by the target directory.
        #[arg(required = true, num_args = 2..)]
        paths: Vec<PathBuf>,
    },

    /// Create an empty file.
    Touch { path: PathBuf },

    /// Create a directory.
    Mkdir { path: PathBuf },

    /// Rename a single file or directory.
    Rename { path: PathBuf, new_name: String },

    /// Write stdin to a file.
    Write { path: PathBuf },

    /// Change permission bits, octal.
    Chmod {
        #[arg(value_parser = parse_octal)]
        mode: u32,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Apply to directory contents as well.
        #[arg(short = 'R', long)]
        recursive: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConflictPolicy {
    /// Keep the existing item.
    Skip,
    /// Merge directories and overwrite files.
    Replace,
    /// Abort the job on the first conflict.
    Abort,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ErrorPolicy {
    /// Skip the failing item and continue.
    Skip,
    /// Abort the job on the first error.
    Abort,
}

fn parse_octal(value: &str) -> Result<u32, String> {
    u32::from_str_radix(value, 8).map_err(|e| format!("not an octal mode: {e}"))
}

/// Prints progress lines to stderr.
struct ConsoleSink;

impl NotificationSink for ConsoleSink {
    fn post(&self, n: Notification) {
        let progress = if n.indeterminate || n.progress_max == 0 {
            String::new()
        } else {
            format!(
                " {} / {}",
                humansize::format_size(n.progress_value, humansize::BINARY),
                humansize::format_size(n.progress_max, humansize::BINARY)
            )
        };
        eprintln!(
            "[{}] {}: {}{}{}",
            n.job_id,
            n.title,
            n.text.unwrap_or_default(),
            n.sub_text.map(|s| format!(" ({s})")).unwrap_or_default(),
            progress
        );
    }

    fn dismiss(&self, job_id: JobId) {
        eprintln!("[{job_id}] done");
    }

    fn message(&self, job_id: JobId, text: &str) {
        eprintln!("[{job_id}] failed: {text}");
    }
}

/// Answers decision prompts by the configured policies.
async fn drive_decisions(
    mut requests: tokio::sync::mpsc::UnboundedReceiver<PendingDecision>,
    on_conflict: ConflictPolicy,
    on_error: ErrorPolicy,
) {
    while let Some(pending) = requests.recv().await {
        match pending {
            PendingDecision::Action { request, reply } => {
                eprintln!("[{}] {}", request.job_id, request.message);
                reply.respond(match on_error {
                    ErrorPolicy::Skip => Decision::Skip {
                        apply_to_all: false,
                    },
                    ErrorPolicy::Abort => Decision::CancelCategory,
                });
            }
            PendingDecision::Conflict { request, reply } => {
                eprintln!(
                    "[{}] '{}' already exists",
                    request.job_id,
                    request.target.display()
                );
                reply.respond(match on_conflict {
                    ConflictPolicy::Skip => ConflictDecision::Skip {
                        apply_to_all: false,
                    },
                    ConflictPolicy::Replace => ConflictDecision::MergeOrReplace {
                        apply_to_all: false,
                    },
                    ConflictPolicy::Abort => ConflictDecision::CancelJob,
                });
            }
        }
    }
}

/// Split `SOURCE... DEST` argument lists.
fn split_target(mut paths: Vec<PathBuf>) -> Result<(Vec<PathBuf>, PathBuf)> {
    let Some(target) = paths.pop() else {
        bail!("missing target path");
    };
    Ok((paths, target))
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let (scheduler, requests) = JobScheduler::new(
        Arc::new(LocalStore::new()),
        Arc::new(ConsoleSink),
        EngineConfig::default(),
    );
    scheduler.activate(tokio::runtime::Handle::current());
    tokio::spawn(drive_decisions(requests, cli.on_conflict, cli.on_error));

    match cli.command {
        Command::Cp { paths } => {
            let (sources, target) = split_target(paths)?;
            scheduler.copy(sources, target);
        }
        Command::Mv { paths } => {
            let (sources, target) = split_target(paths)?;
            scheduler.move_to(sources, target);
        }
        Command::Rm { paths } => {
            scheduler.delete(paths);
        }
        Command::Archive { paths } => {
            let (sources, archive) = split_target(paths)?;
            scheduler.archive(sources, archive);
        }
        Command::Extract { paths } => {
            let (archives, target) = split_target(paths)?;
            scheduler.extract(archives, target);
        }
        Command::Touch { path } => {
            scheduler.create_file(path);
        }
        Command::Mkdir { path } => {
            scheduler.create_directory(path);
        }
        Command::Rename { path, new_name } => {
            scheduler.rename(path, new_name);
        }
        Command::Write { path } => {
            let mut content = Vec::new();
            std::io::Read::read_to_end(&mut std::io::stdin(), &mut content)?;
            let (tx, rx) = std::sync::mpsc::channel();
            scheduler.write(
                path,
                content,
                Some(Box::new(move |success| {
                    let _ = tx.send(success);
                })),
            );
            scheduler.wait_idle().await;
            if !rx.try_recv().unwrap_or(false) {
                bail!("write failed");
            }
            return Ok(());
        }
        Command::Chmod {
            mode,
            paths,
            recursive,
        } => {
            scheduler.set_mode(paths, mode, recursive);
        }
    }

    scheduler.wait_idle().await;
    Ok(())
}
