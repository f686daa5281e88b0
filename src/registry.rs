use std::{collections::HashSet, path::Path};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{error::Result, paths};

const FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("files");
const INDEX_ROOTS: TableDefinition<&str, i64> =
    TableDefinition::new("index_roots");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Folder => "folder",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "folder" { Self::Folder } else { Self::File }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registry row, keyed by its absolute path.
///
/// Times are seconds since the Unix epoch. `summary` and `tech_stack` are
/// sticky: rescans carry them forward and only explicit writes replace
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub kind: EntryKind,
    pub extension: String,
    pub size: u64,
    pub created: i64,
    pub modified: i64,
    pub indexed_at: i64,
    pub summary: Option<String>,
    pub tech_stack: Option<String>,
}

impl FileEntry {
    pub fn name(&self) -> String {
        paths::file_name(&self.path)
    }

    pub fn has_summary(&self) -> bool {
        self.summary.as_deref().is_some_and(|s| !s.trim().is_empty())
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// An indexed top-level directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexRoot {
    pub root_path: String,
    pub indexed_at: i64,
}

/// Row counts reported by `status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub files: usize,
    pub folders: usize,
    pub summarized_files: usize,
    pub roots: usize,
}

/// Persisted per-path metadata, indexed roots and daemon settings.
pub struct Registry {
    db: Database,
}

impl Registry {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(FILES)?;
        txn.open_table(INDEX_ROOTS)?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Entries --

    /// Insert or replace the row for `entry.path`.
    pub fn put(&self, entry: &FileEntry) -> Result<()> {
        let bytes = entry.to_bytes()?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(FILES)?;
            table.insert(entry.path.as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get(&self, path: &str) -> Result<Option<FileEntry>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FILES)?;
        match table.get(path)? {
            Some(v) => Ok(Some(FileEntry::from_bytes(v.value())?)),
            None => Ok(None),
        }
    }

    /// Read-modify-write a single row inside one write transaction.
    ///
    /// Returns the updated row, or `None` when `path` is not registered.
    pub fn update<F>(&self, path: &str, apply: F) -> Result<Option<FileEntry>>
    where
        F: FnOnce(&mut FileEntry),
    {
        let txn = self.db.begin_write()?;
        let updated = {
            let mut table = txn.open_table(FILES)?;
            let current = match table.get(path)? {
                Some(v) => Some(FileEntry::from_bytes(v.value())?),
                None => None,
            };
            match current {
                Some(mut entry) => {
                    apply(&mut entry);
                    let bytes = entry.to_bytes()?;
                    table.insert(path, bytes.as_slice())?;
                    Some(entry)
                }
                None => None,
            }
        };
        txn.commit()?;
        Ok(updated)
    }

    /// Rows strictly below `folder`; only one segment down unless
    /// `recursive` is set.
    pub fn children(
        &self,
        folder: &str,
        recursive: bool,
    ) -> Result<Vec<FileEntry>> {
        let prefix = paths::child_prefix(folder);
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FILES)?;

        let mut result = Vec::new();
        for entry in table.range(prefix.as_str()..)? {
            let (k, v) = entry?;
            let key = k.value();
            if !key.starts_with(&prefix) {
                break;
            }
            if !recursive && !paths::is_direct_child(key, folder) {
                continue;
            }
            result.push(FileEntry::from_bytes(v.value())?);
        }
        Ok(result)
    }

    /// Every registered row, in path order.
    pub fn list_all(&self) -> Result<Vec<FileEntry>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FILES)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_k, v) = entry?;
            result.push(FileEntry::from_bytes(v.value())?);
        }
        Ok(result)
    }

    /// Paths whose lowercase form contains `needle`, in path order.
    pub fn paths_containing(
        &self,
        needle: &str,
        limit: usize,
    ) -> Result<Vec<FileEntry>> {
        let needle = needle.to_lowercase();
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FILES)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            if result.len() >= limit {
                break;
            }
            let (k, v) = entry?;
            if k.value().to_lowercase().contains(&needle) {
                result.push(FileEntry::from_bytes(v.value())?);
            }
        }
        Ok(result)
    }

    /// First file row without a summary whose path is not in `skip`.
    pub fn first_unsummarized(
        &self,
        skip: &HashSet<String>,
    ) -> Result<Option<FileEntry>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FILES)?;
        for entry in table.iter()? {
            let (k, v) = entry?;
            if skip.contains(k.value()) {
                continue;
            }
            let row = FileEntry::from_bytes(v.value())?;
            if row.kind == EntryKind::File && !row.has_summary() {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    pub fn stats(&self) -> Result<RegistryStats> {
        let mut stats = RegistryStats::default();
        for row in self.list_all()? {
            match row.kind {
                EntryKind::Folder => stats.folders += 1,
                EntryKind::File => {
                    stats.files += 1;
                    if row.has_summary() {
                        stats.summarized_files += 1;
                    }
                }
            }
        }
        stats.roots = self.list_roots()?.len();
        Ok(stats)
    }

    // -- Index roots --

    pub fn add_root(&self, root_path: &str, indexed_at: i64) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(INDEX_ROOTS)?;
            table.insert(root_path, indexed_at)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn list_roots(&self) -> Result<Vec<IndexRoot>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(INDEX_ROOTS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push(IndexRoot {
                root_path: k.value().to_string(),
                indexed_at: v.value(),
            });
        }
        Ok(result)
    }

    /// Longest indexed root containing `path` on a segment boundary.
    pub fn best_root_for(&self, path: &str) -> Result<Option<String>> {
        let roots = self.list_roots()?;
        Ok(paths::best_root(
            path,
            roots.iter().map(|r| r.root_path.as_str()),
        ))
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }

    /// Get a setting, returning the default if not set.
    pub fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)?
            .unwrap_or_else(|| default.to_string()))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}
