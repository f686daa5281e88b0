//! The paired Registry / Content Index.
//!
//! Every write that touches a path goes through [`Store`], which holds a
//! single write lock across the registry row and its content-index
//! document so the two never disagree for any one path.

use std::{
    collections::HashSet,
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde::Serialize;

use crate::{
    content_index::{ContentIndex, IndexedDoc},
    data_dir::DataDir,
    dates,
    error::{Error, Result},
    paths,
    registry::{EntryKind, FileEntry, IndexRoot, Registry},
};

/// Filesystem facts about one file, as read by the scanner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub created: i64,
    pub modified: i64,
}

/// Values written into a folder's rows by an aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderRollup {
    pub summary: String,
    pub tech_stack: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    pub files: usize,
    pub folders: usize,
    pub summarized_files: usize,
    pub roots: usize,
    pub indexed_documents: u64,
}

/// When a content-index write is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flush {
    Now,
    Deferred,
}

pub struct Store {
    registry: Registry,
    index: ContentIndex,
    write_lock: Mutex<()>,
}

impl Store {
    /// Open both halves under `data_dir`.
    pub fn open(data_dir: &DataDir) -> Result<Self> {
        let registry = Registry::open(&data_dir.registry_db())?;
        let index = ContentIndex::open(&data_dir.tantivy_dir()?)?;
        Ok(Self::from_parts(registry, index))
    }

    pub fn from_parts(registry: Registry, index: ContentIndex) -> Self {
        Self {
            registry,
            index,
            write_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn index(&self) -> &ContentIndex {
        &self.index
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_doc(&self, doc: &IndexedDoc, flush: Flush) -> Result<()> {
        match flush {
            Flush::Now => self.index.upsert(doc),
            Flush::Deferred => self.index.stage(doc),
        }
    }

    /// Start a group of writes whose content-index documents are committed
    /// together by [`StoreBatch::commit`]. Registry rows are written
    /// immediately.
    pub fn batch(&self) -> StoreBatch<'_> {
        StoreBatch { store: self }
    }

    /// Register or refresh a file, carrying forward any summary and tech
    /// stack already stored for it.
    pub fn upsert_file(
        &self,
        path: &Path,
        content: &str,
        stat: FileStat,
    ) -> Result<()> {
        self.put_file(path, content, stat, Flush::Now)
    }

    fn put_file(
        &self,
        path: &Path,
        content: &str,
        stat: FileStat,
        flush: Flush,
    ) -> Result<()> {
        let key = paths::key(path);
        let _guard = self.lock();

        let previous = self.registry.get(&key)?;
        let (summary, tech_stack) = previous
            .map(|row| (row.summary, row.tech_stack))
            .unwrap_or_default();

        let entry = FileEntry {
            extension: paths::extension(&key),
            path: key,
            kind: EntryKind::File,
            size: stat.size,
            created: stat.created,
            modified: stat.modified,
            indexed_at: dates::now_secs(),
            summary,
            tech_stack,
        };

        let doc = IndexedDoc {
            path: entry.path.clone(),
            kind: EntryKind::File.to_string(),
            ext: entry.extension.clone(),
            content: content.to_string(),
            summary: entry.summary.clone().unwrap_or_default(),
            tech_stack: entry.tech_stack.clone().unwrap_or_default(),
            created: dates::date_token(stat.created),
            modified: dates::date_token(stat.modified),
        };

        self.write_doc(&doc, flush)?;
        self.registry.put(&entry)?;
        tracing::debug!(path = %entry.path, "indexed file");
        Ok(())
    }

    /// Register or refresh a folder. Existing aggregate values on both
    /// sides are kept until the next aggregation pass replaces them.
    pub fn upsert_folder(
        &self,
        path: &Path,
        modified: i64,
        created: i64,
    ) -> Result<()> {
        self.put_folder(path, modified, created, Flush::Now)
    }

    fn put_folder(
        &self,
        path: &Path,
        modified: i64,
        created: i64,
        flush: Flush,
    ) -> Result<()> {
        let key = paths::key(path);
        let _guard = self.lock();

        let previous = self.registry.get(&key)?;
        let previous_doc = self.index.get(&key)?.unwrap_or_default();
        let (summary, tech_stack) = previous
            .map(|row| (row.summary, row.tech_stack))
            .unwrap_or_default();

        let entry = FileEntry {
            path: key,
            kind: EntryKind::Folder,
            extension: String::new(),
            size: 0,
            created,
            modified,
            indexed_at: dates::now_secs(),
            summary,
            tech_stack,
        };

        let doc = IndexedDoc {
            path: entry.path.clone(),
            kind: EntryKind::Folder.to_string(),
            ext: String::new(),
            content: previous_doc.content,
            summary: previous_doc.summary,
            tech_stack: previous_doc.tech_stack,
            created: dates::date_token(created),
            modified: dates::date_token(modified),
        };

        self.write_doc(&doc, flush)?;
        self.registry.put(&entry)?;
        tracing::debug!(path = %entry.path, "indexed folder");
        Ok(())
    }

    /// Replace the summary of a registered file or folder on both sides.
    pub fn update_summary(&self, path: &str, summary: &str) -> Result<()> {
        self.update_text(
            path,
            |row| row.summary = Some(summary.to_string()),
            |doc| doc.summary = summary.to_string(),
        )
    }

    /// Replace the tech stack of a registered file or folder on both sides.
    pub fn update_tech_stack(
        &self,
        path: &str,
        tech_stack: &str,
    ) -> Result<()> {
        self.update_text(
            path,
            |row| row.tech_stack = Some(tech_stack.to_string()),
            |doc| doc.tech_stack = tech_stack.to_string(),
        )
    }

    fn update_text<R, D>(&self, path: &str, on_row: R, on_doc: D) -> Result<()>
    where
        R: FnOnce(&mut FileEntry),
        D: FnOnce(&mut IndexedDoc),
    {
        let key = paths::key(Path::new(path));
        let _guard = self.lock();

        let row = self.registry.update(&key, on_row)?.ok_or_else(|| {
            Error::NotFound {
                kind: "path",
                name: key.clone(),
            }
        })?;

        let mut doc = match self.index.get(&key)? {
            Some(doc) => doc,
            None => minimal_doc(&row),
        };
        on_doc(&mut doc);
        self.index.upsert(&doc)
    }

    fn put_rollup(
        &self,
        folder: &str,
        direct: &FolderRollup,
        recursive: &FolderRollup,
        flush: Flush,
    ) -> Result<()> {
        let _guard = self.lock();

        let row = self
            .registry
            .update(folder, |row| {
                row.summary = Some(direct.summary.clone());
                row.tech_stack = Some(direct.tech_stack.clone());
            })?
            .ok_or_else(|| Error::NotFound {
                kind: "folder",
                name: folder.to_string(),
            })?;

        let (created, modified) = match self.index.get(folder)? {
            Some(doc) => (doc.created, doc.modified),
            None => (
                dates::date_token(row.created),
                dates::date_token(row.modified),
            ),
        };

        let doc = IndexedDoc {
            path: folder.to_string(),
            kind: EntryKind::Folder.to_string(),
            ext: String::new(),
            content: recursive.content.clone(),
            summary: recursive.summary.clone(),
            tech_stack: recursive.tech_stack.clone(),
            created,
            modified,
        };
        self.write_doc(&doc, flush)
    }

    pub fn get_metadata(&self, path: &str) -> Result<Option<FileEntry>> {
        self.registry.get(&paths::key(Path::new(path)))
    }

    /// Drop the content index and rebuild it from registry rows, re-reading
    /// file bodies. Unreadable files get empty content.
    pub fn rebuild_index(&self) -> Result<usize> {
        let _guard = self.lock();
        let rows = self.registry.list_all()?;

        let docs: Vec<IndexedDoc> = rows
            .iter()
            .map(|row| {
                let content = match row.kind {
                    EntryKind::File => read_lossy(Path::new(&row.path))
                        .unwrap_or_else(|e| {
                            tracing::debug!(
                                path = %row.path,
                                error = %e,
                                "unreadable during rebuild"
                            );
                            String::new()
                        }),
                    EntryKind::Folder => String::new(),
                };
                IndexedDoc {
                    content,
                    ..minimal_doc(row)
                }
            })
            .collect();

        self.index.replace_all(&docs)?;
        tracing::info!(documents = docs.len(), "rebuilt content index");
        Ok(docs.len())
    }

    /// Direct children of `folder`, folders first, then by name ignoring
    /// case.
    pub fn list_folder(&self, folder: &str) -> Result<Vec<FileEntry>> {
        let key = paths::key(Path::new(folder));
        let mut children = self.registry.children(&key, false)?;
        children.sort_by_cached_key(|row| {
            (row.kind != EntryKind::Folder, row.name().to_lowercase())
        });
        Ok(children)
    }

    pub fn next_unsummarized(
        &self,
        skip: &HashSet<String>,
    ) -> Result<Option<FileEntry>> {
        self.registry.first_unsummarized(skip)
    }

    /// Record `root` as an indexed root and return its normalized key.
    pub fn add_root(&self, root: &Path) -> Result<String> {
        let key = paths::key(root);
        self.registry.add_root(&key, dates::now_secs())?;
        Ok(key)
    }

    pub fn best_root_for(&self, path: &str) -> Result<Option<String>> {
        self.registry.best_root_for(path)
    }

    pub fn list_roots(&self) -> Result<Vec<IndexRoot>> {
        self.registry.list_roots()
    }

    pub fn status(&self) -> Result<StoreStatus> {
        let stats = self.registry.stats()?;
        Ok(StoreStatus {
            files: stats.files,
            folders: stats.folders,
            summarized_files: stats.summarized_files,
            roots: stats.roots,
            indexed_documents: self.index.num_docs()?,
        })
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

/// Writes that share one content-index commit. Documents staged through a
/// batch stay invisible to search until [`commit`](Self::commit), or
/// until any other write on the store commits.
#[derive(Debug)]
pub struct StoreBatch<'a> {
    store: &'a Store,
}

impl<'a> StoreBatch<'a> {
    pub fn store(&self) -> &'a Store {
        self.store
    }

    pub fn upsert_file(
        &self,
        path: &Path,
        content: &str,
        stat: FileStat,
    ) -> Result<()> {
        self.store.put_file(path, content, stat, Flush::Deferred)
    }

    pub fn upsert_folder(
        &self,
        path: &Path,
        modified: i64,
        created: i64,
    ) -> Result<()> {
        self.store.put_folder(path, modified, created, Flush::Deferred)
    }

    /// Write an aggregation result: `direct` into the registry row,
    /// `recursive` into the content-index document. Date tokens already
    /// indexed for the folder are kept.
    pub fn write_folder_rollup(
        &self,
        folder: &str,
        direct: &FolderRollup,
        recursive: &FolderRollup,
    ) -> Result<()> {
        self.store
            .put_rollup(folder, direct, recursive, Flush::Deferred)
    }

    pub fn commit(self) -> Result<()> {
        self.store.index.commit()
    }
}

/// Run storage work on the blocking pool so redb and tantivy I/O stay off
/// the async executor.
pub async fn blocking<T, F>(store: &Arc<Store>, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Store) -> Result<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || work(&store)).await?
}

/// Content-index document for a registry row, with empty content.
fn minimal_doc(row: &FileEntry) -> IndexedDoc {
    IndexedDoc {
        path: row.path.clone(),
        kind: row.kind.to_string(),
        ext: row.extension.clone(),
        content: String::new(),
        summary: row.summary.clone().unwrap_or_default(),
        tech_stack: row.tech_stack.clone().unwrap_or_default(),
        created: dates::date_token(row.created),
        modified: dates::date_token(row.modified),
    }
}

/// Read a file as text, replacing invalid UTF-8.
pub fn read_lossy(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_store() -> (tempfile::TempDir, Store) {
        let tmp = tempfile::tempdir().unwrap();
        let registry =
            Registry::open(&tmp.path().join("registry.redb")).unwrap();
        let index = ContentIndex::open_in_ram().unwrap();
        (tmp, Store::from_parts(registry, index))
    }

    fn stat() -> FileStat {
        FileStat {
            size: 10,
            created: 1_700_000_000,
            modified: 1_700_000_000,
        }
    }

    #[test]
    fn reindex_keeps_one_row_and_the_summary() {
        let (_tmp, store) = test_store();
        let path = Path::new("/r/a.txt");

        store.upsert_file(path, "hello", stat()).unwrap();
        store.update_summary("/r/a.txt", "A greeting.").unwrap();
        store.upsert_file(path, "hello again", stat()).unwrap();

        assert_eq!(store.registry().list_all().unwrap().len(), 1);
        assert_eq!(store.index().num_docs().unwrap(), 1);

        let row = store.get_metadata("/r/a.txt").unwrap().unwrap();
        assert_eq!(row.summary.as_deref(), Some("A greeting."));
        let doc = store.index().get("/r/a.txt").unwrap().unwrap();
        assert_eq!(doc.summary, "A greeting.");
        assert_eq!(doc.content, "hello again");
        assert_eq!(doc.ext, "txt");
    }

    #[test]
    fn batch_commits_documents_once() {
        let (_tmp, store) = test_store();
        let batch = store.batch();
        batch.upsert_folder(Path::new("/r"), 0, 0).unwrap();
        batch.upsert_file(Path::new("/r/a.md"), "alpha", stat()).unwrap();
        batch.upsert_file(Path::new("/r/b.md"), "beta", stat()).unwrap();

        assert_eq!(store.registry().list_all().unwrap().len(), 3);
        assert_eq!(store.index().num_docs().unwrap(), 0);

        batch.commit().unwrap();
        assert_eq!(store.index().num_docs().unwrap(), 3);
        let doc = store.index().get("/r/b.md").unwrap().unwrap();
        assert_eq!(doc.content, "beta");
    }

    #[tokio::test]
    async fn blocking_runs_off_the_executor() {
        let (_tmp, store) = test_store();
        let store = Arc::new(store);
        let roots = blocking(&store, |store| {
            store.add_root(Path::new("/r"))?;
            store.list_roots()
        })
        .await
        .unwrap();
        assert_eq!(roots.len(), 1);
    }

    #[test]
    fn update_summary_requires_registry_row() {
        let (_tmp, store) = test_store();
        let err = store.update_summary("/nowhere.txt", "x").unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn update_summary_creates_missing_index_row() {
        let (_tmp, store) = test_store();
        store
            .registry()
            .put(&FileEntry {
                path: "/r/b".into(),
                kind: EntryKind::Folder,
                extension: String::new(),
                size: 0,
                created: 1_700_000_000,
                modified: 1_700_000_000,
                indexed_at: 0,
                summary: None,
                tech_stack: None,
            })
            .unwrap();

        store.update_summary("/r/b", "A folder.").unwrap();

        let doc = store.index().get("/r/b").unwrap().unwrap();
        assert_eq!(doc.kind, "folder");
        assert_eq!(doc.summary, "A folder.");
        assert!(!doc.created.is_empty());
    }

    #[test]
    fn update_tech_stack_writes_both_sides() {
        let (_tmp, store) = test_store();
        store.upsert_file(Path::new("/r/a.py"), "x", stat()).unwrap();
        store.update_tech_stack("/r/a.py", "Python").unwrap();

        let row = store.get_metadata("/r/a.py").unwrap().unwrap();
        assert_eq!(row.tech_stack.as_deref(), Some("Python"));
        let doc = store.index().get("/r/a.py").unwrap().unwrap();
        assert_eq!(doc.tech_stack, "Python");
    }

    #[test]
    fn rollup_splits_registry_and_index() {
        let (_tmp, store) = test_store();
        store
            .upsert_folder(Path::new("/r"), 1_700_000_000, 1_700_000_000)
            .unwrap();
        let before = store.index().get("/r").unwrap().unwrap();

        let direct = FolderRollup {
            summary: "direct".into(),
            tech_stack: "Python".into(),
            content: String::new(),
        };
        let recursive = FolderRollup {
            summary: "recursive".into(),
            tech_stack: "Python, SQL".into(),
            content: "recursive content".into(),
        };
        let batch = store.batch();
        batch.write_folder_rollup("/r", &direct, &recursive).unwrap();
        batch.commit().unwrap();

        let row = store.get_metadata("/r").unwrap().unwrap();
        assert_eq!(row.summary.as_deref(), Some("direct"));
        let doc = store.index().get("/r").unwrap().unwrap();
        assert_eq!(doc.summary, "recursive");
        assert_eq!(doc.content, "recursive content");
        assert_eq!(doc.created, before.created);
    }

    #[test]
    fn rebuild_rereads_files_and_tolerates_missing_ones() {
        let (tmp, store) = test_store();
        let real = tmp.path().join("real.md");
        std::fs::write(&real, "fresh body").unwrap();

        store.upsert_file(&real, "stale body", stat()).unwrap();
        store
            .upsert_file(&tmp.path().join("gone.md"), "ghost", stat())
            .unwrap();

        assert_eq!(store.rebuild_index().unwrap(), 2);

        let real_doc = store.index().get(&paths::key(&real)).unwrap().unwrap();
        assert_eq!(real_doc.content, "fresh body");
        let gone = paths::key(&tmp.path().join("gone.md"));
        assert_eq!(store.index().get(&gone).unwrap().unwrap().content, "");
    }

    #[test]
    fn list_folder_orders_folders_first() {
        let (_tmp, store) = test_store();
        store.upsert_folder(Path::new("/r"), 0, 0).unwrap();
        store.upsert_file(Path::new("/r/b.txt"), "", stat()).unwrap();
        store.upsert_file(Path::new("/r/A.txt"), "", stat()).unwrap();
        store.upsert_folder(Path::new("/r/zeta"), 0, 0).unwrap();
        store.upsert_file(Path::new("/r/zeta/deep.txt"), "", stat()).unwrap();

        let names: Vec<String> = store
            .list_folder("/r")
            .unwrap()
            .iter()
            .map(FileEntry::name)
            .collect();
        assert_eq!(names, vec!["zeta", "A.txt", "b.txt"]);
    }

    #[test]
    fn status_counts_rows_and_documents() {
        let (_tmp, store) = test_store();
        store.add_root(Path::new("/r")).unwrap();
        store.upsert_folder(Path::new("/r"), 0, 0).unwrap();
        store.upsert_file(Path::new("/r/a.txt"), "", stat()).unwrap();

        let status = store.status().unwrap();
        assert_eq!(status.files, 1);
        assert_eq!(status.folders, 1);
        assert_eq!(status.roots, 1);
        assert_eq!(status.indexed_documents, 2);
    }
}
