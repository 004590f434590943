//! Duplicate-name resolution for copies into the same directory.

use std::path::Path;

use stevedore_core::FileStore;

/// Byte range and value of an existing `" (N)"` suffix in a name's base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateCountInfo {
    /// Byte offset where the suffix starts (at the space).
    pub start: usize,
    /// Byte offset one past the closing parenthesis.
    pub end: usize,
    /// The numeric value between the parentheses.
    pub value: u64,
}

/// Parse a trailing `" (N)"` suffix from a name's base.
pub fn find_count_suffix(base: &str) -> Option<DuplicateCountInfo> {
    let bytes = base.as_bytes();
    if bytes.last() != Some(&b')') {
        return None;
    }

    let digits_end = bytes.len() - 1;
    let mut i = digits_end;
    while i > 0 && bytes[i - 1].is_ascii_digit() {
        i -= 1;
    }
    if i == digits_end || i < 2 || bytes[i - 1] != b'(' || bytes[i - 2] != b' ' {
        return None;
    }

    let value = base[i..digits_end].parse().ok()?;
    Some(DuplicateCountInfo {
        start: i - 2,
        end: bytes.len(),
        value,
    })
}

/// Produce a sibling name that does not collide with an existing entry.
///
/// The count is spliced into the base of the name: the full name for
/// directories, the name minus its extension for files. An existing `" (N)"`
/// suffix is replaced in place starting at `N + 1`, so resolving
/// `"file (1).txt"` and resolving `"file.txt"` twice land on the same names.
/// Candidates are probed through the store without following symlinks; if
/// none within `probe_limit` is free the original name is returned unchanged.
pub fn next_available_name(
    store: &dyn FileStore,
    dir: &Path,
    name: &str,
    is_directory: bool,
    probe_limit: u64,
) -> String {
    let base_len = if is_directory {
        name.len()
    } else {
        match name.rfind('.') {
            // A leading dot is a hidden name, not an extension.
            Some(dot) if dot > 0 => dot,
            _ => name.len(),
        }
    };
    let (base, extension) = name.split_at(base_len);

    let (range, start) = match find_count_suffix(base) {
        Some(info) => ((info.start, info.end), info.value),
        None => ((base.len(), base.len()), 0),
    };

    for count in (start + 1)..=start.saturating_add(probe_limit) {
        let candidate = format!(
            "{} ({}){}{}",
            &base[..range.0],
            count,
            &base[range.1..],
            extension
        );
        if !store.exists(&dir.join(&candidate), false) {
            return candidate;
        }
    }

    name.to_string()
}
