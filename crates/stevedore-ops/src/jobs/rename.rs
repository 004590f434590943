//! Rename job and filename validation.

use std::path::PathBuf;

use stevedore_core::{ErrorCategory, Failure, OpsError};

use crate::job::JobContext;
use crate::notify::Notification;

const TITLE: &str = "Renaming";

pub(crate) fn run_rename(ctx: &JobContext, path: PathBuf, new_name: String) -> Result<(), OpsError> {
    ctx.sink.post(Notification {
        job_id: ctx.id,
        title: TITLE.to_string(),
        text: Some(new_name.clone()),
        sub_text: None,
        progress_max: 0,
        progress_value: 0,
        indeterminate: true,
        cancelable: true,
    });

    let parent = path.parent().map(PathBuf::from).unwrap_or_default();
    let target = parent.join(&new_name);

    ctx.with_retries(TITLE, || {
        ctx.check_cancelled()?;
        if let Err(reason) = validate_filename(&new_name) {
            return Err(Failure::new(&path, ErrorCategory::Other, reason).into());
        }
        // Re-checked per attempt; the obstacle may have been moved away.
        if target != path && ctx.store.exists(&target, false) {
            return Err(Failure::new(
                &path,
                ErrorCategory::Other,
                format!("'{new_name}' already exists"),
            )
            .into());
        }
        ctx.store
            .rename(&path, &target)
            .map_err(|e| Failure::io(&path, ErrorCategory::Other, &e).into())
    })?;

    Ok(())
}

/// Validate a filename for cross-platform compatibility.
pub fn validate_filename(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Name cannot be empty".into());
    }

    if name.len() > 255 {
        return Err("Name is too long (max 255 characters)".into());
    }

    let invalid_chars = ['/', '\0'];
    for c in invalid_chars {
        if name.contains(c) {
            return Err(format!("Name cannot contain '{}'", c.escape_default()));
        }
    }

    // Additional Windows restrictions (good to enforce everywhere for portability)
    #[cfg(target_os = "windows")]
    {
        let windows_invalid = ['\\', ':', '*', '?', '"', '<', '>', '|'];
        for c in windows_invalid {
            if name.contains(c) {
                return Err(format!("Name cannot contain '{}'", c));
            }
        }

        let reserved = [
            "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
            "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
        ];
        let upper_name = name.to_uppercase();
        let base_name = upper_name.split('.').next().unwrap_or("");
        if reserved.contains(&base_name) {
            return Err("Reserved filename".into());
        }
    }

    if name.starts_with(' ') || name.ends_with(' ') {
        return Err("Name cannot start or end with spaces".into());
    }

    if name.ends_with('.') {
        return Err("Name cannot end with a dot".into());
    }

    if name == "." || name == ".." {
        return Err("'.' and '..' are reserved names".into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_filename_valid() {
        assert!(validate_filename("test.txt").is_ok());
        assert!(validate_filename("my-file").is_ok());
        assert!(validate_filename(".hidden").is_ok());
        assert!(validate_filename("file with spaces").is_ok());
    }

    #[test]
    fn test_validate_filename_invalid() {
        assert!(validate_filename("").is_err());
        assert!(validate_filename("test/file").is_err());
        assert!(validate_filename(".").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename("file ").is_err());
        assert!(validate_filename(" file").is_err());
        assert!(validate_filename("file.").is_err());
    }
}
