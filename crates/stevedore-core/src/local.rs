//! Local filesystem implementation of [`FileStore`].

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::store::{FileStore, FileType, ItemAttrs};

/// A [`FileStore`] backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStore;

impl LocalStore {
    pub fn new() -> Self {
        Self
    }
}

fn attrs_from_metadata(metadata: &fs::Metadata) -> ItemAttrs {
    let file_type = if metadata.is_dir() {
        FileType::Directory
    } else if metadata.is_file() {
        FileType::File
    } else if metadata.file_type().is_symlink() {
        FileType::Symlink
    } else {
        FileType::Other
    };

    ItemAttrs {
        len: metadata.len(),
        file_type,
        modified: metadata.modified().ok(),
        mode: get_mode(metadata),
    }
}

#[cfg(unix)]
fn get_mode(metadata: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode())
}

#[cfg(not(unix))]
fn get_mode(_metadata: &fs::Metadata) -> Option<u32> {
    None
}

fn unsupported(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, format!("{what} is not supported on this store"))
}

impl FileStore for LocalStore {
    fn attrs(&self, path: &Path, follow_links: bool) -> io::Result<ItemAttrs> {
        let metadata = if follow_links {
            fs::metadata(path)?
        } else {
            fs::symlink_metadata(path)?
        };
        Ok(attrs_from_metadata(&metadata))
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut children = Vec::new();
        for entry in fs::read_dir(path)? {
            children.push(entry?.path());
        }
        // Deterministic visit order keeps progress reproducible.
        children.sort();
        Ok(children)
    }

    fn create_file(&self, path: &Path) -> io::Result<()> {
        fs::File::create_new(path)?;
        Ok(())
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir(path)
    }

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(path)?))
    }

    fn open_write(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(fs::File::create(path)?))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    #[cfg(unix)]
    fn set_mode(&self, path: &Path, mode: u32, follow_links: bool) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        if !follow_links && self.attrs(path, false)?.is_symlink() {
            // Permission bits on the link itself are meaningless on Linux.
            return Err(unsupported("mode on symlinks"));
        }
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }

    #[cfg(not(unix))]
    fn set_mode(&self, _path: &Path, _mode: u32, _follow_links: bool) -> io::Result<()> {
        Err(unsupported("mode"))
    }

    #[cfg(unix)]
    fn set_owner(&self, path: &Path, uid: u32, follow_links: bool) -> io::Result<()> {
        if follow_links {
            std::os::unix::fs::chown(path, Some(uid), None)
        } else {
            std::os::unix::fs::lchown(path, Some(uid), None)
        }
    }

    #[cfg(not(unix))]
    fn set_owner(&self, _path: &Path, _uid: u32, _follow_links: bool) -> io::Result<()> {
        Err(unsupported("ownership"))
    }

    #[cfg(unix)]
    fn set_group(&self, path: &Path, gid: u32, follow_links: bool) -> io::Result<()> {
        if follow_links {
            std::os::unix::fs::chown(path, None, Some(gid))
        } else {
            std::os::unix::fs::lchown(path, None, Some(gid))
        }
    }

    #[cfg(not(unix))]
    fn set_group(&self, _path: &Path, _gid: u32, _follow_links: bool) -> io::Result<()> {
        Err(unsupported("ownership"))
    }

    fn set_security_label(&self, _path: &Path, _label: &str, _follow_links: bool) -> io::Result<()> {
        Err(unsupported("security labels"))
    }

    fn restore_security_label(&self, _path: &Path, _follow_links: bool) -> io::Result<()> {
        Err(unsupported("security labels"))
    }

    fn is_read_only(&self, _path: &Path) -> bool {
        false
    }

    fn supports_remount(&self, _path: &Path) -> bool {
        false
    }

    fn remount_read_write(&self, _path: &Path) -> io::Result<()> {
        Err(unsupported("remounting"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_attrs_and_listing() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("a.txt"), "hello").unwrap();
        fs::create_dir(root.join("dir")).unwrap();

        let store = LocalStore::new();

        let attrs = store.attrs(&root.join("a.txt"), true).unwrap();
        assert_eq!(attrs.len, 5);
        assert!(!attrs.is_dir());
        assert_eq!(attrs.transfer_size(), 5);

        let attrs = store.attrs(&root.join("dir"), true).unwrap();
        assert!(attrs.is_dir());
        assert_eq!(attrs.transfer_size(), 0);

        let children = store.list_dir(root).unwrap();
        assert_eq!(children.len(), 2);
        // Sorted order.
        assert!(children[0].ends_with("a.txt"));
    }

    #[test]
    fn test_create_file_refuses_existing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("x");
        let store = LocalStore::new();

        store.create_file(&path).unwrap();
        assert!(store.create_file(&path).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_attrs_without_following() {
        let temp = TempDir::new().unwrap();
        let link = temp.path().join("dangling");
        std::os::unix::fs::symlink("/nonexistent/target", &link).unwrap();

        let store = LocalStore::new();
        // Following the link fails, reading the link itself succeeds.
        assert!(store.attrs(&link, true).is_err());
        let attrs = store.attrs(&link, false).unwrap();
        assert!(attrs.is_symlink());
    }

    #[test]
    fn test_rename_and_remove() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::new();
        let from = temp.path().join("from");
        let to = temp.path().join("to");

        store.create_file(&from).unwrap();
        store.rename(&from, &to).unwrap();
        assert!(!store.exists(&from, false));
        assert!(store.exists(&to, false));

        store.remove_file(&to).unwrap();
        assert!(!store.exists(&to, false));
    }
}
