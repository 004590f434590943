//! Recursive directory traversal with visitor callbacks.

use std::io;
use std::path::Path;

use tokio_util::sync::CancellationToken;

use stevedore_core::{FileStore, ItemAttrs, OpsError};

/// What to do after a directory's pre-visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkFlow {
    /// Descend into the directory.
    Continue,
    /// Skip the directory's contents; its post-visit is skipped too.
    SkipSubtree,
}

/// Visitor driven by [`walk`].
///
/// A directory's `pre_visit_dir` runs before any of its children, its
/// `post_visit_dir` after all of them. Errors reading an entry or a
/// directory's children are surfaced through `visit_failed` instead of
/// aborting the walk.
pub trait TreeVisitor {
    fn pre_visit_dir(&mut self, path: &Path, attrs: &ItemAttrs) -> Result<WalkFlow, OpsError>;

    fn visit_file(&mut self, path: &Path, attrs: &ItemAttrs) -> Result<(), OpsError>;

    fn post_visit_dir(&mut self, path: &Path) -> Result<(), OpsError> {
        let _ = path;
        Ok(())
    }

    fn visit_failed(&mut self, path: &Path, error: &io::Error) -> Result<(), OpsError> {
        tracing::warn!(path = %path.display(), %error, "skipping unreadable entry");
        Ok(())
    }
}

/// Traversal options.
#[derive(Debug, Clone, Copy)]
pub struct WalkOptions {
    /// Descend into directories. When false the visitor is applied to the
    /// root path only.
    pub recursive: bool,
    /// Follow a symlink at the root path.
    pub follow_root_links: bool,
    /// Follow symlinks below the root.
    pub follow_links: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            follow_root_links: true,
            follow_links: false,
        }
    }
}

impl WalkOptions {
    /// Visit the single given path without descending.
    pub fn single() -> Self {
        Self {
            recursive: false,
            ..Self::default()
        }
    }
}

/// Walk `root`, driving `visitor`.
///
/// Cancellation is checked before every visit; an observed cancellation
/// unwinds as [`OpsError::Interrupted`] without further callbacks.
pub fn walk(
    store: &dyn FileStore,
    root: &Path,
    options: WalkOptions,
    cancel: &CancellationToken,
    visitor: &mut dyn TreeVisitor,
) -> Result<(), OpsError> {
    check_cancel(cancel)?;

    let attrs = match read_attrs(store, root, options.follow_root_links) {
        Ok(attrs) => attrs,
        Err(error) => return visitor.visit_failed(root, &error),
    };

    if !attrs.is_dir() {
        return visitor.visit_file(root, &attrs);
    }
    if !options.recursive {
        if visitor.pre_visit_dir(root, &attrs)? == WalkFlow::Continue {
            visitor.post_visit_dir(root)?;
        }
        return Ok(());
    }

    walk_dir(store, root, &attrs, options, cancel, visitor)
}

fn walk_dir(
    store: &dyn FileStore,
    dir: &Path,
    attrs: &ItemAttrs,
    options: WalkOptions,
    cancel: &CancellationToken,
    visitor: &mut dyn TreeVisitor,
) -> Result<(), OpsError> {
    check_cancel(cancel)?;

    if visitor.pre_visit_dir(dir, attrs)? == WalkFlow::SkipSubtree {
        return Ok(());
    }

    match store.list_dir(dir) {
        Ok(children) => {
            for child in children {
                check_cancel(cancel)?;
                match read_attrs(store, &child, options.follow_links) {
                    Ok(child_attrs) if child_attrs.is_dir() => {
                        walk_dir(store, &child, &child_attrs, options, cancel, visitor)?;
                    }
                    Ok(child_attrs) => visitor.visit_file(&child, &child_attrs)?,
                    Err(error) => visitor.visit_failed(&child, &error)?,
                }
            }
        }
        Err(error) => visitor.visit_failed(dir, &error)?,
    }

    visitor.post_visit_dir(dir)
}

/// Read attributes, falling back to the link itself when the target is
/// unreadable so broken symlinks stay visitable.
fn read_attrs(store: &dyn FileStore, path: &Path, follow_links: bool) -> io::Result<ItemAttrs> {
    if follow_links {
        store
            .attrs(path, true)
            .or_else(|_| store.attrs(path, false))
    } else {
        store.attrs(path, false)
    }
}

fn check_cancel(cancel: &CancellationToken) -> Result<(), OpsError> {
    if cancel.is_cancelled() {
        Err(OpsError::Interrupted)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use stevedore_core::LocalStore;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        skip: Option<PathBuf>,
    }

    impl Recorder {
        fn name(path: &Path) -> String {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string())
        }
    }

    impl TreeVisitor for Recorder {
        fn pre_visit_dir(&mut self, path: &Path, _attrs: &ItemAttrs) -> Result<WalkFlow, OpsError> {
            self.events.push(format!("pre {}", Self::name(path)));
            if self.skip.as_deref() == Some(path) {
                return Ok(WalkFlow::SkipSubtree);
            }
            Ok(WalkFlow::Continue)
        }

        fn visit_file(&mut self, path: &Path, _attrs: &ItemAttrs) -> Result<(), OpsError> {
            self.events.push(format!("file {}", Self::name(path)));
            Ok(())
        }

        fn post_visit_dir(&mut self, path: &Path) -> Result<(), OpsError> {
            self.events.push(format!("post {}", Self::name(path)));
            Ok(())
        }
    }

    fn create_test_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        fs::create_dir(root.join("dir1")).unwrap();
        fs::create_dir(root.join("dir1/subdir")).unwrap();
        fs::write(root.join("a.txt"), "hello").unwrap();
        fs::write(root.join("dir1/b.txt"), "world").unwrap();
        fs::write(root.join("dir1/subdir/c.txt"), "deep").unwrap();

        temp
    }

    #[test]
    fn test_pre_children_post_ordering() {
        let temp = create_test_tree();
        let store = LocalStore::new();
        let mut visitor = Recorder::default();

        walk(
            &store,
            temp.path(),
            WalkOptions::default(),
            &CancellationToken::new(),
            &mut visitor,
        )
        .unwrap();

        let events = visitor.events;
        let pos = |needle: &str| events.iter().position(|e| e == needle).unwrap();

        assert!(pos("pre dir1") < pos("file b.txt"));
        assert!(pos("pre subdir") < pos("file c.txt"));
        assert!(pos("file c.txt") < pos("post subdir"));
        assert!(pos("post subdir") < pos("post dir1"));
    }

    #[test]
    fn test_skip_subtree() {
        let temp = create_test_tree();
        let store = LocalStore::new();
        let mut visitor = Recorder {
            skip: Some(temp.path().join("dir1")),
            ..Default::default()
        };

        walk(
            &store,
            temp.path(),
            WalkOptions::default(),
            &CancellationToken::new(),
            &mut visitor,
        )
        .unwrap();

        assert!(visitor.events.contains(&"pre dir1".to_string()));
        assert!(!visitor.events.iter().any(|e| e.contains("b.txt")));
        // A skipped subtree gets no post-visit either.
        assert!(!visitor.events.contains(&"post dir1".to_string()));
    }

    #[test]
    fn test_non_recursive_single_file() {
        let temp = create_test_tree();
        let store = LocalStore::new();
        let mut visitor = Recorder::default();

        walk(
            &store,
            &temp.path().join("a.txt"),
            WalkOptions::single(),
            &CancellationToken::new(),
            &mut visitor,
        )
        .unwrap();

        assert_eq!(visitor.events, vec!["file a.txt"]);
    }

    #[test]
    fn test_non_recursive_directory() {
        let temp = create_test_tree();
        let store = LocalStore::new();
        let mut visitor = Recorder::default();

        walk(
            &store,
            &temp.path().join("dir1"),
            WalkOptions::single(),
            &CancellationToken::new(),
            &mut visitor,
        )
        .unwrap();

        assert_eq!(visitor.events, vec!["pre dir1", "post dir1"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_broken_symlink_stays_visitable() {
        let temp = TempDir::new().unwrap();
        let link = temp.path().join("dangling");
        std::os::unix::fs::symlink("/nonexistent/target", &link).unwrap();

        let store = LocalStore::new();
        let mut visitor = Recorder::default();

        walk(
            &store,
            &link,
            WalkOptions::single(),
            &CancellationToken::new(),
            &mut visitor,
        )
        .unwrap();

        // Following the link fails; the fallback visits the link itself.
        assert_eq!(visitor.events, vec!["file dangling"]);
    }

    #[test]
    fn test_cancellation_short_circuits() {
        let temp = create_test_tree();
        let store = LocalStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut visitor = Recorder::default();
        let result = walk(
            &store,
            temp.path(),
            WalkOptions::default(),
            &cancel,
            &mut visitor,
        );

        assert!(matches!(result, Err(OpsError::Interrupted)));
        assert!(visitor.events.is_empty());
    }
}
