//! Path helpers shared by the registry, scanner and search.
//!
//! Registry keys are absolute, lexically normalized path strings. Ancestry
//! checks are done on path-segment boundaries, never on raw string
//! prefixes: `/data/root2` is not inside `/data/root`.

use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

/// Make `path` absolute against the current directory and resolve `.` and
/// `..` components lexically. Symlinks are left alone.
pub fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Normalized registry key for `path`.
pub fn key(path: &Path) -> String {
    normalize(path).to_string_lossy().into_owned()
}

/// `path` with a single trailing separator, used as a range-scan prefix
/// for everything strictly below it.
pub fn child_prefix(path: &str) -> String {
    let trimmed = path.trim_end_matches(MAIN_SEPARATOR);
    format!("{trimmed}{MAIN_SEPARATOR}")
}

/// True when `path` equals `root` or is nested under it.
pub fn is_within(path: &str, root: &str) -> bool {
    let root_trimmed = root.trim_end_matches(MAIN_SEPARATOR);
    if root_trimmed.is_empty() {
        // The filesystem root contains every absolute path.
        return path.starts_with(MAIN_SEPARATOR);
    }
    path == root_trimmed || path.starts_with(&child_prefix(root_trimmed))
}

/// True when `child` sits exactly one segment below `parent`.
pub fn is_direct_child(child: &str, parent: &str) -> bool {
    let prefix = child_prefix(parent);
    child
        .strip_prefix(&prefix)
        .is_some_and(|rest| !rest.is_empty() && !rest.contains(MAIN_SEPARATOR))
}

/// Parent directory of `path` as a key, or `None` at the filesystem root.
pub fn parent(path: &str) -> Option<String> {
    Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|p| !p.is_empty())
}

/// Final path segment, or the whole string when there is none.
pub fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Lowercase extension without the dot, empty when there is none.
pub fn extension(path: &str) -> String {
    Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Longest root in `roots` that contains `path`.
pub fn best_root<'a, I>(path: &str, roots: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    roots
        .into_iter()
        .map(|r| r.trim_end_matches(MAIN_SEPARATOR))
        .filter(|r| is_within(path, r))
        .max_by_key(|r| r.len())
        .map(str::to_string)
}
