use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;

use crate::{
    aggregate::{self, MAX_CHILDREN},
    dates,
    error::{Error, Result},
    paths,
    registry::EntryKind,
    store::{self, FileStat, Store, StoreBatch},
    walker,
};

/// Outcome of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub root: String,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub folders: usize,
}

/// Index everything under `root` and refresh folder rollups bottom-up.
///
/// The root is recorded as an indexed root first. Files and folders that
/// fail to read or write are logged and skipped; only an unreadable root
/// fails the scan.
pub fn scan(store: &Store, root: &Path) -> Result<ScanReport> {
    if !root.is_dir() {
        return Err(Error::NotFound {
            kind: "folder",
            name: root.display().to_string(),
        });
    }
    let root_key = store.add_root(root)?;
    tracing::info!(root = %root_key, "scanning");

    let found = walker::discover(Path::new(&root_key))?;
    let mut report = ScanReport {
        root: root_key,
        ..Default::default()
    };

    let batch = store.batch();
    let mut folders = Vec::with_capacity(found.folders.len());
    for folder in &found.folders {
        match index_folder(&batch, folder) {
            Ok(()) => folders.push(paths::key(folder)),
            Err(e) => tracing::warn!(
                path = %folder.display(),
                error = %e,
                "skipped folder"
            ),
        }
    }
    batch.commit()?;
    report.folders = folders.len();

    // Read files in parallel, then write sequentially through the store.
    let loaded: Vec<(PathBuf, Result<(String, FileStat)>)> = found
        .files
        .par_iter()
        .map(|path| (path.clone(), read_file(path)))
        .collect();

    let batch = store.batch();
    for (path, read) in loaded {
        let written = read.and_then(|(content, stat)| {
            batch.upsert_file(&path, &content, stat)
        });
        match written {
            Ok(()) => report.files_indexed += 1,
            Err(e) => {
                report.files_skipped += 1;
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "skipped file"
                );
            }
        }
    }

    batch.commit()?;

    aggregate_folders(store, folders)?;

    tracing::info!(
        root = %report.root,
        files = report.files_indexed,
        skipped = report.files_skipped,
        folders = report.folders,
        "scan complete"
    );
    Ok(report)
}

/// Recompute rollups for every registered folder, deepest first.
pub fn reaggregate_all(store: &Store) -> Result<usize> {
    let folders: Vec<String> = store
        .registry()
        .list_all()?
        .into_iter()
        .filter(|row| row.kind == EntryKind::Folder)
        .map(|row| row.path)
        .collect();
    aggregate_folders(store, folders)
}

/// Aggregate `folders` in descending path length so children are fresh
/// before their ancestors read them. Rollups only read registry rows, so
/// the whole sweep shares one content-index commit.
fn aggregate_folders(store: &Store, mut folders: Vec<String>) -> Result<usize> {
    folders.sort_by(|a, b| b.len().cmp(&a.len()));
    let batch = store.batch();
    let mut done = 0;
    for folder in &folders {
        match aggregate::update_folder_aggregate(&batch, folder, MAX_CHILDREN) {
            Ok(()) => done += 1,
            Err(e) => tracing::warn!(
                folder = %folder,
                error = %e,
                "folder aggregate failed"
            ),
        }
    }
    batch.commit()?;
    Ok(done)
}

fn index_folder(batch: &StoreBatch<'_>, folder: &Path) -> Result<()> {
    let stat = stat_path(folder)?;
    batch.upsert_folder(folder, stat.modified, stat.created)
}

fn read_file(path: &Path) -> Result<(String, FileStat)> {
    let stat = stat_path(path)?;
    let content = store::read_lossy(path)?;
    Ok((content, stat))
}

/// Size and times for `path`. Creation time falls back to modification
/// time on filesystems that do not record it.
pub fn stat_path(path: &Path) -> Result<FileStat> {
    let meta = std::fs::metadata(path)?;
    let modified = meta.modified().map(dates::system_time_secs).unwrap_or(0);
    let created = meta
        .created()
        .map(dates::system_time_secs)
        .unwrap_or(modified);
    Ok(FileStat {
        size: meta.len(),
        created,
        modified,
    })
}
