//! Background summarization.
//!
//! One file per iteration: read it, ask the generator for a summary,
//! store it, then refresh folder rollups up to the file's indexed root.

use std::{collections::HashSet, path::Path, sync::Arc, time::Duration};

use crate::{
    ai::SharedGenerator,
    aggregate,
    error::Result,
    store::{self, Store},
};

/// Pause when nothing is left to summarize.
pub const IDLE_DELAY: Duration = Duration::from_secs(5);
/// Pause between two summarized files.
pub const BUSY_DELAY: Duration = Duration::from_millis(500);
/// Pause after a failed iteration.
pub const ERROR_DELAY: Duration = Duration::from_secs(5);

/// What a single iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    Idle,
    Summarized(String),
    /// The file could not be read or produced an empty summary; it is not
    /// retried for the life of this worker.
    Skipped(String),
}

pub struct Worker {
    store: Arc<Store>,
    generator: SharedGenerator,
    skip: HashSet<String>,
}

impl Worker {
    pub fn new(store: Arc<Store>, generator: SharedGenerator) -> Self {
        Self {
            store,
            generator,
            skip: HashSet::new(),
        }
    }

    /// Loop forever. Errors are logged and followed by a cooldown.
    pub async fn run(mut self) {
        tracing::info!("background summarizer started");
        loop {
            let delay = match self.run_once().await {
                Ok(WorkOutcome::Idle) => IDLE_DELAY,
                Ok(_) => BUSY_DELAY,
                Err(e) => {
                    tracing::warn!(error = %e, "summarizer iteration failed");
                    ERROR_DELAY
                }
            };
            tokio::time::sleep(delay).await;
        }
    }

    pub async fn run_once(&mut self) -> Result<WorkOutcome> {
        let skip = self.skip.clone();
        let next = store::blocking(&self.store, move |store| {
            let Some(row) = store.next_unsummarized(&skip)? else {
                return Ok(None);
            };
            let content = store::read_lossy(Path::new(&row.path));
            Ok(Some((row.path, content)))
        })
        .await?;
        let Some((path, content)) = next else {
            return Ok(WorkOutcome::Idle);
        };

        let content = match content {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "cannot read file");
                self.skip.insert(path.clone());
                return Ok(WorkOutcome::Skipped(path));
            }
        };

        tracing::debug!(path = %path, "summarizing");
        let summary = self.generator.summarize(&content).await?;
        let summary = summary.trim();
        if summary.is_empty() {
            tracing::warn!(path = %path, "generator returned an empty summary");
            self.skip.insert(path.clone());
            return Ok(WorkOutcome::Skipped(path));
        }

        let (target, summary) = (path.clone(), summary.to_string());
        store::blocking(&self.store, move |store| {
            store.update_summary(&target, &summary)?;
            let stop_at = store.best_root_for(&target)?;
            aggregate::update_folder_aggregate_up_tree(
                store,
                &target,
                stop_at.as_deref(),
            )
        })
        .await?;

        tracing::info!(path = %path, "summarized");
        Ok(WorkOutcome::Summarized(path))
    }

    pub fn skipped(&self) -> usize {
        self.skip.len()
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("skipped", &self.skip.len())
            .finish_non_exhaustive()
    }
}

/// Spawn the worker on the current runtime.
pub fn spawn(
    store: Arc<Store>,
    generator: SharedGenerator,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(Worker::new(store, generator).run())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::{ai::scripted::ScriptedGenerator, paths, scanner};

    fn scanned() -> (tempfile::TempDir, tempfile::TempDir, Arc<Store>, String) {
        let (db, store) = crate::store::tests::test_store();
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("proj");
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src").join("main.py"), "print('hi')")
            .unwrap();
        scanner::scan(&store, &root).unwrap();
        (db, tmp, Arc::new(store), paths::key(&root))
    }

    #[tokio::test]
    async fn summarizes_and_refreshes_ancestors() {
        let (_db, _tmp, store, root) = scanned();
        let generator = Arc::new(ScriptedGenerator {
            summary: Some("Prints a greeting.".into()),
            ..Default::default()
        });
        let mut worker = Worker::new(store.clone(), generator.clone());

        let file = format!("{root}/src/main.py");
        assert_eq!(
            worker.run_once().await.unwrap(),
            WorkOutcome::Summarized(file.clone())
        );
        assert_eq!(worker.run_once().await.unwrap(), WorkOutcome::Idle);
        assert_eq!(generator.summary_calls.load(Ordering::SeqCst), 1);

        let row = store.get_metadata(&file).unwrap().unwrap();
        assert_eq!(row.summary.as_deref(), Some("Prints a greeting."));

        let src = format!("{root}/src");
        let row = store.get_metadata(&src).unwrap().unwrap();
        assert!(row.summary.unwrap().starts_with("Folder with 1 files"));
        let doc = store.index().get(&src).unwrap().unwrap();
        assert!(doc.content.contains("main.py: Prints a greeting."));
        let doc = store.index().get(&root).unwrap().unwrap();
        assert!(doc.content.contains("Prints a greeting."));
    }

    #[tokio::test]
    async fn generator_failure_is_not_persisted() {
        let (_db, _tmp, store, root) = scanned();
        let generator = Arc::new(ScriptedGenerator::default());
        let mut worker = Worker::new(store.clone(), generator);

        let err = worker.run_once().await.unwrap_err();
        assert!(matches!(err, crate::error::Error::Generator(_)));
        let row = store
            .get_metadata(&format!("{root}/src/main.py"))
            .unwrap()
            .unwrap();
        assert!(!row.has_summary());
        assert_eq!(worker.skipped(), 0);
    }

    #[tokio::test]
    async fn unreadable_files_are_skipped() {
        let (_db, tmp, store, root) = scanned();
        std::fs::remove_file(tmp.path().join("proj/src/main.py")).unwrap();
        let generator = Arc::new(ScriptedGenerator {
            summary: Some("unused".into()),
            ..Default::default()
        });
        let mut worker = Worker::new(store, generator);

        assert_eq!(
            worker.run_once().await.unwrap(),
            WorkOutcome::Skipped(format!("{root}/src/main.py"))
        );
        assert_eq!(worker.run_once().await.unwrap(), WorkOutcome::Idle);
    }
}
