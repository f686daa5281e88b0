//! Folder rollups.
//!
//! A folder's registry row describes its direct children (what you see
//! when you open it); its content-index document describes every
//! descendant (what a search of the subtree should hit).

use std::path::Path;

use crate::{
    error::Result,
    paths,
    registry::{EntryKind, FileEntry},
    store::{FolderRollup, Store, StoreBatch},
};

/// Default cap on child names and summaries folded into a rollup.
pub const MAX_CHILDREN: usize = 60;

const MAX_TECH_LABELS: usize = 12;
const TOP_TYPES: usize = 5;

/// Statistics over a set of child rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderStats {
    pub file_count: usize,
    pub folder_count: usize,
    /// Extension counts over files, most frequent first; ties keep first
    /// appearance order.
    pub ext_counts: Vec<(String, usize)>,
    pub tech_labels: Vec<String>,
    pub synopsis: String,
    pub content: String,
}

impl FolderStats {
    pub fn tech_stack(&self) -> String {
        if self.tech_labels.is_empty() {
            "Mixed".to_string()
        } else {
            self.tech_labels.join(", ")
        }
    }

    pub fn rollup(&self) -> FolderRollup {
        FolderRollup {
            summary: self.synopsis.clone(),
            tech_stack: self.tech_stack(),
            content: self.content.clone(),
        }
    }
}

/// Human label for a file extension; unknown extensions are uppercased.
pub fn tech_label(ext: &str) -> String {
    let label = match ext.to_lowercase().as_str() {
        "py" => "Python",
        "js" => "JavaScript",
        "ts" => "TypeScript",
        "tsx" => "React, TypeScript",
        "jsx" => "React, JavaScript",
        "sql" => "SQL",
        "json" => "JSON",
        "md" => "Markdown",
        "csv" => "CSV",
        "yml" | "yaml" => "YAML",
        "swift" => "Swift",
        "html" => "HTML",
        "css" => "CSS",
        "sh" => "Shell",
        "env" => "Env",
        "config" => "Config",
        _ => return ext.to_uppercase(),
    };
    label.to_string()
}

pub fn compute_stats(rows: &[FileEntry], max_children: usize) -> FolderStats {
    let mut stats = FolderStats::default();
    let mut names = Vec::new();
    let mut summaries = Vec::new();

    for row in rows {
        let name = row.name();
        match row.kind {
            EntryKind::Folder => stats.folder_count += 1,
            EntryKind::File => {
                stats.file_count += 1;
                let counted = stats
                    .ext_counts
                    .iter_mut()
                    .find(|(ext, _)| *ext == row.extension);
                match counted {
                    Some((_, count)) => *count += 1,
                    None => stats.ext_counts.push((row.extension.clone(), 1)),
                }
            }
        }
        if let Some(summary) = row.summary.as_deref().map(str::trim)
            && !summary.is_empty()
        {
            summaries.push(format!("{name}: {summary}"));
        }
        names.push(name);
    }

    // Stable, so equal counts stay in first-seen order.
    stats.ext_counts.sort_by(|a, b| b.1.cmp(&a.1));

    for (ext, _) in stats.ext_counts.iter().take(MAX_TECH_LABELS) {
        if ext.is_empty() {
            continue;
        }
        let label = tech_label(ext);
        if !stats.tech_labels.contains(&label) {
            stats.tech_labels.push(label);
        }
    }

    let top_types: Vec<String> = stats
        .ext_counts
        .iter()
        .take(TOP_TYPES)
        .filter(|(ext, _)| !ext.is_empty())
        .map(|(ext, count)| format!("{ext}:{count}"))
        .collect();
    stats.synopsis = if top_types.is_empty() {
        format!(
            "Folder with {} files and {} subfolders.",
            stats.file_count, stats.folder_count
        )
    } else {
        format!(
            "Folder with {} files and {} subfolders. Top types: {}.",
            stats.file_count,
            stats.folder_count,
            top_types.join(", ")
        )
    };

    names.truncate(max_children);
    summaries.truncate(max_children);
    stats.content = format!(
        "{} {} {}",
        stats.synopsis,
        names.join(" "),
        summaries.join(" ")
    )
    .trim()
    .to_string();

    stats
}

/// Recompute `folder`'s rollups: direct children into the registry row,
/// all descendants into the content index. The document is staged on
/// `batch`; the caller commits.
pub fn update_folder_aggregate(
    batch: &StoreBatch<'_>,
    folder: &str,
    max_children: usize,
) -> Result<()> {
    let store = batch.store();
    let direct = store.registry().children(folder, false)?;
    let recursive = store.registry().children(folder, true)?;

    let direct = compute_stats(&direct, max_children);
    let recursive = compute_stats(&recursive, max_children);

    batch.write_folder_rollup(folder, &direct.rollup(), &recursive.rollup())?;
    tracing::debug!(
        folder,
        files = recursive.file_count,
        folders = recursive.folder_count,
        "aggregated folder"
    );
    Ok(())
}

/// Refresh every registered folder from the one containing `path` upward.
///
/// Stops below the filesystem root, or after refreshing `stop_at`.
/// Failures on individual folders are logged and skipped. All refreshed
/// documents share one commit. Returns how many folders were refreshed.
pub fn update_folder_aggregate_up_tree(
    store: &Store,
    path: &str,
    stop_at: Option<&str>,
) -> Result<usize> {
    let path = paths::key(Path::new(path));
    let stop_at = stop_at.map(|s| paths::key(Path::new(s)));

    let starts_at_self = match store.registry().get(&path)? {
        Some(row) => row.kind == EntryKind::Folder,
        None => Path::new(&path).is_dir(),
    };
    let mut current = if starts_at_self {
        Some(path)
    } else {
        paths::parent(&path)
    };

    let batch = store.batch();
    let mut refreshed = 0;
    while let Some(folder) = current {
        let Some(parent) = paths::parent(&folder) else {
            break;
        };

        let is_folder = store
            .registry()
            .get(&folder)?
            .is_some_and(|row| row.kind == EntryKind::Folder);
        if is_folder {
            match update_folder_aggregate(&batch, &folder, MAX_CHILDREN) {
                Ok(()) => refreshed += 1,
                Err(e) => {
                    tracing::warn!(
                        folder = %folder,
                        error = %e,
                        "folder aggregate failed"
                    );
                }
            }
        }

        if stop_at.as_deref() == Some(folder.as_str()) {
            break;
        }
        current = Some(parent);
    }

    batch.commit()?;
    Ok(refreshed)
}
