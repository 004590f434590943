//! The hierarchical file store abstraction.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Kind of a store entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
    Symlink,
    Other,
}

/// Attributes of a store entry.
#[derive(Debug, Clone)]
pub struct ItemAttrs {
    /// Byte size of the entry.
    pub len: u64,
    /// Entry kind.
    pub file_type: FileType,
    /// Last modification time, if the store tracks one.
    pub modified: Option<SystemTime>,
    /// Unix permission bits, if the store tracks them.
    pub mode: Option<u32>,
}

impl ItemAttrs {
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type == FileType::Symlink
    }

    /// Byte size this entry contributes to transfer totals.
    ///
    /// Directories contribute zero; their contents are tallied per file.
    pub fn transfer_size(&self) -> u64 {
        if self.is_dir() { 0 } else { self.len }
    }
}

/// A hierarchical file store.
///
/// The engine performs every mutation through this trait so that jobs stay
/// agnostic of the concrete backend. All calls may block on I/O; jobs run on
/// blocking workers and check cancellation between calls.
pub trait FileStore: Send + Sync {
    /// Read the attributes of a path.
    ///
    /// With `follow_links`, attributes of a symlink's target are returned;
    /// without it, the link itself is described.
    fn attrs(&self, path: &Path, follow_links: bool) -> io::Result<ItemAttrs>;

    /// List the children of a directory.
    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Create an empty file. Fails if the path already exists.
    fn create_file(&self, path: &Path) -> io::Result<()>;

    /// Create a directory.
    fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Open a file's contents for reading.
    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;

    /// Open a file for writing, truncating any existing contents.
    fn open_write(&self, path: &Path) -> io::Result<Box<dyn Write + Send>>;

    /// Atomically rename an entry within the store.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Remove a file or symlink.
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Remove an empty directory.
    fn remove_dir(&self, path: &Path) -> io::Result<()>;

    /// Set Unix permission bits.
    fn set_mode(&self, path: &Path, mode: u32, follow_links: bool) -> io::Result<()>;

    /// Change the owning user.
    fn set_owner(&self, path: &Path, uid: u32, follow_links: bool) -> io::Result<()>;

    /// Change the owning group.
    fn set_group(&self, path: &Path, gid: u32, follow_links: bool) -> io::Result<()>;

    /// Set the security label (e.g. an SELinux context).
    fn set_security_label(&self, path: &Path, label: &str, follow_links: bool) -> io::Result<()>;

    /// Restore the security label to the store's default for the path.
    fn restore_security_label(&self, path: &Path, follow_links: bool) -> io::Result<()>;

    /// Whether the store containing `path` is mounted read-only.
    fn is_read_only(&self, path: &Path) -> bool;

    /// Whether the store containing `path` can be remounted read-write.
    fn supports_remount(&self, path: &Path) -> bool;

    /// Remount the store containing `path` read-write.
    fn remount_read_write(&self, path: &Path) -> io::Result<()>;

    /// Whether an entry exists at `path`.
    fn exists(&self, path: &Path, follow_links: bool) -> bool {
        self.attrs(path, follow_links).is_ok()
    }
}
