use std::path::{Path, PathBuf};

use crate::{error::Result, paths};

/// File extensions the scanner indexes.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "txt", "md", "py", "swift", "json", "js", "ts", "tsx", "jsx", "css",
    "html", "sql", "csv", "yaml", "yml", "sh", "config", "env",
];

/// Everything found under a scan root.
#[derive(Debug, Clone, Default)]
pub struct Discovered {
    /// Every visited directory, the root included, in visit order.
    pub folders: Vec<PathBuf>,
    /// Files with a supported extension.
    pub files: Vec<PathBuf>,
}

/// Recursively walk `root`, collecting directories and supported files.
///
/// Skips entries whose name starts with `.`. Unreadable directories are
/// logged and skipped; only a failure to read `root` itself is an error.
pub fn discover(root: &Path) -> Result<Discovered> {
    let mut found = Discovered::default();
    let entries = std::fs::read_dir(root)?;
    found.folders.push(root.to_path_buf());
    walk_entries(root, entries, &mut found);
    Ok(found)
}

fn walk_dir(dir: &Path, found: &mut Discovered) {
    match std::fs::read_dir(dir) {
        Ok(entries) => {
            found.folders.push(dir.to_path_buf());
            walk_entries(dir, entries, found);
        }
        Err(e) => {
            tracing::warn!(
                path = %dir.display(),
                error = %e,
                "skipping unreadable directory"
            );
        }
    }
}

fn walk_entries(
    dir: &Path,
    entries: std::fs::ReadDir,
    found: &mut Discovered,
) {
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(
                    path = %dir.display(),
                    error = %e,
                    "skipping unreadable entry"
                );
                continue;
            }
        };
        let file_name = entry.file_name();
        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            walk_dir(&path, found);
        } else if file_type.is_symlink() {
            // Symlinked files are indexed under their link path; symlinked
            // directories are not followed.
            if path.is_file() && is_supported(&path) {
                found.files.push(path);
            }
        } else if file_type.is_file() && is_supported(&path) {
            found.files.push(path);
        }
    }
}

pub fn is_supported(path: &Path) -> bool {
    let ext = paths::extension(&path.to_string_lossy());
    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}
