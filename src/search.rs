use std::{collections::HashSet, path::Path, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    content_index::IndexHit,
    error::Result,
    paths,
    query::{self, Filter},
    registry::{EntryKind, FileEntry},
    store::Store,
    text_util,
};

/// Most results a single search returns, bubbled folders included.
pub const MAX_RESULTS: usize = 20;

const PATH_MATCH_LIMIT: usize = 10;
const INDEX_LIMIT: usize = 20;
const SNIPPET_CHARS: usize = 200;

pub const BUBBLED_SNIPPET: &str = "Contains matching files.";

static PATH_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"path:([A-Za-z0-9_\-\.]+)\*").expect("valid path token regex")
});

/// Phrasings that mean "every file of this type".
const EXTENSION_ALIASES: &[(&str, &str)] = &[
    ("sql files", "sql"),
    ("sql file", "sql"),
    ("csv files", "csv"),
    ("csv file", "csv"),
    ("json files", "json"),
    ("json file", "json"),
    ("python scripts", "py"),
    ("python script", "py"),
    ("react components", "tsx"),
    ("react component", "tsx"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub path: String,
    pub kind: EntryKind,
    pub snippet: String,
}

impl From<IndexHit> for SearchHit {
    fn from(hit: IndexHit) -> Self {
        Self {
            path: hit.path,
            kind: EntryKind::parse(&hit.kind),
            snippet: hit.snippet,
        }
    }
}

/// Run `filter_text` against the store.
///
/// Structured text (field qualifiers or `AND`/`OR`) runs as a filter,
/// with its `path:<token>*` leaves also matched as path substrings.
/// Anything else runs as free text after an extension-alias lookup.
/// Results are deduplicated by path in first-seen order, limited to
/// `root` when given, and followed by the indexed folders that contain
/// matching files.
pub fn search(
    store: &Store,
    filter_text: &str,
    root: Option<&str>,
) -> Result<Vec<SearchHit>> {
    let filter_text = filter_text.trim();
    if filter_text.is_empty() {
        return Ok(Vec::new());
    }

    let candidates = if query::has_structured_syntax(filter_text) {
        structured_candidates(store, filter_text)
    } else {
        free_text_candidates(store, filter_text)?
    };

    let root = root.map(|r| paths::key(Path::new(r)));
    let in_scope = |path: &str| {
        root.as_deref().is_none_or(|root| paths::is_within(path, root))
    };

    let mut seen = HashSet::new();
    let mut results: Vec<SearchHit> = candidates
        .into_iter()
        .filter(|hit| in_scope(&hit.path))
        .filter(|hit| seen.insert(hit.path.clone()))
        .collect();

    let files: Vec<&str> = results
        .iter()
        .filter(|hit| hit.kind == EntryKind::File)
        .map(|hit| hit.path.as_str())
        .collect();
    let bubbled: Vec<SearchHit> = containing_folders(store, &files)?
        .into_iter()
        .filter(|folder| in_scope(folder))
        .filter(|folder| seen.insert(folder.clone()))
        .map(|path| SearchHit {
            path,
            kind: EntryKind::Folder,
            snippet: BUBBLED_SNIPPET.to_string(),
        })
        .collect();
    results.extend(bubbled);

    results.truncate(MAX_RESULTS);
    tracing::debug!(
        query = filter_text,
        results = results.len(),
        "search complete"
    );
    Ok(results)
}

/// Candidates for filter text. Engine errors are logged and whatever was
/// gathered so far is kept.
fn structured_candidates(store: &Store, filter_text: &str) -> Vec<SearchHit> {
    let filter = match Filter::parse(filter_text) {
        Ok(filter) => Some(filter),
        Err(e) => {
            tracing::debug!(
                error = %e,
                "filter parse failed, using engine parser"
            );
            None
        }
    };

    let prefixes: Vec<&str> = match &filter {
        Some(filter) => filter.path_prefixes(),
        None => PATH_TOKEN
            .captures_iter(filter_text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str())
            .collect(),
    };

    let mut hits = Vec::new();
    for prefix in prefixes {
        match path_matches(store, prefix) {
            Ok(found) => hits.extend(found),
            Err(e) => tracing::warn!(error = %e, "path match failed"),
        }
    }

    let ranked = match &filter {
        Some(filter) => store.index().search_filter(filter, INDEX_LIMIT),
        None => store.index().search_text(filter_text, INDEX_LIMIT),
    };
    match ranked {
        Ok(found) => hits.extend(found.into_iter().map(SearchHit::from)),
        Err(e) => tracing::warn!(error = %e, "filter search failed"),
    }

    hits
}

fn free_text_candidates(
    store: &Store,
    text: &str,
) -> Result<Vec<SearchHit>> {
    let mut hits = Vec::new();

    if let Some(ext) = extension_alias(text) {
        let found = store.index().search_extension(ext, INDEX_LIMIT)?;
        hits.extend(found.into_iter().map(SearchHit::from));
    }

    hits.extend(path_matches(store, text)?);

    match store.index().search_text(text, INDEX_LIMIT) {
        Ok(found) => hits.extend(found.into_iter().map(SearchHit::from)),
        Err(e) => tracing::debug!(error = %e, "full-text match failed"),
    }

    Ok(hits)
}

pub fn extension_alias(text: &str) -> Option<&'static str> {
    let lowered = text.trim().to_lowercase();
    EXTENSION_ALIASES
        .iter()
        .find(|(phrase, _)| *phrase == lowered)
        .map(|(_, ext)| *ext)
}

/// Registry paths containing `needle`, with a preview of the indexed
/// content as the snippet.
fn path_matches(store: &Store, needle: &str) -> Result<Vec<SearchHit>> {
    let rows = store.registry().paths_containing(needle, PATH_MATCH_LIMIT)?;
    rows.into_iter()
        .map(|row| {
            let snippet = match store.index().get(&row.path)? {
                Some(doc) if !doc.content.trim().is_empty() => {
                    text_util::preview(&doc.content, SNIPPET_CHARS)
                }
                Some(doc) => doc.summary,
                None => String::new(),
            };
            Ok(SearchHit {
                path: row.path,
                kind: row.kind,
                snippet,
            })
        })
        .collect()
}

/// Registered folders between each file and its best indexed root,
/// the root included, shortest path first.
fn containing_folders(store: &Store, files: &[&str]) -> Result<Vec<String>> {
    if files.is_empty() {
        return Ok(Vec::new());
    }
    let roots: Vec<String> = store
        .list_roots()?
        .into_iter()
        .map(|r| r.root_path)
        .collect();

    let mut folders: Vec<String> = Vec::new();
    for file in files {
        let stop_at = paths::best_root(file, roots.iter().map(String::as_str));
        let mut current = paths::parent(file);

        while let Some(folder) = current {
            if paths::parent(&folder).is_none() {
                break;
            }
            let is_folder = store
                .registry()
                .get(&folder)?
                .is_some_and(|row: FileEntry| row.kind == EntryKind::Folder);
            if is_folder && !folders.contains(&folder) {
                folders.push(folder.clone());
            }
            if stop_at.as_deref() == Some(folder.as_str()) {
                break;
            }
            current = paths::parent(&folder);
        }
    }

    folders.sort_by_key(String::len);
    Ok(folders)
}

/// Print results for a terminal.
pub fn format_human(results: &[SearchHit]) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    for (i, hit) in results.iter().enumerate() {
        println!("{:>3}. [{}] {}", i + 1, hit.kind, hit.path);
        let snippet = text_util::preview(&hit.snippet, 120);
        if !snippet.is_empty() {
            println!("     {snippet}");
        }
    }
    println!("\n{} result(s)", results.len());
}

/// Print results as a single JSON document.
pub fn format_json(results: &[SearchHit], query: &str) -> Result<()> {
    let doc = serde_json::json!({
        "query": query,
        "result_count": results.len(),
        "results": results,
    });
    println!("{}", serde_json::to_string(&doc)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        scanner,
        store::{FileStat, tests::test_store},
    };

    fn stat() -> FileStat {
        FileStat {
            size: 1,
            created: 1_700_000_000,
            modified: 1_700_000_000,
        }
    }

    fn paths_of(results: &[SearchHit]) -> Vec<&str> {
        results.iter().map(|h| h.path.as_str()).collect()
    }

    fn two_roots() -> (tempfile::TempDir, String, String) {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["alpha", "beta"] {
            let root = tmp.path().join(name);
            std::fs::create_dir_all(root.join("db")).unwrap();
            std::fs::write(
                root.join("db").join("schema.sql"),
                "create table invoices (id integer primary key);",
            )
            .unwrap();
        }
        let a = paths::key(&tmp.path().join("alpha"));
        let b = paths::key(&tmp.path().join("beta"));
        (tmp, a, b)
    }

    #[test]
    fn root_scope_keeps_one_copy() {
        let (_db, store) = test_store();
        let (_tmp, a, b) = two_roots();
        scanner::scan(&store, Path::new(&a)).unwrap();
        scanner::scan(&store, Path::new(&b)).unwrap();

        let everywhere = search(&store, "invoices", None).unwrap();
        let files: Vec<&SearchHit> = everywhere
            .iter()
            .filter(|h| h.kind == EntryKind::File)
            .collect();
        assert_eq!(files.len(), 2);

        let scoped = search(&store, "invoices", Some(&a)).unwrap();
        assert!(!scoped.is_empty());
        assert!(scoped.iter().all(|h| paths::is_within(&h.path, &a)));
        let schema = format!("{a}/db/schema.sql");
        assert!(paths_of(&scoped).contains(&schema.as_str()));
    }

    #[test]
    fn matching_files_bubble_their_folders() {
        let (_db, store) = test_store();
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("proj");
        std::fs::create_dir_all(root.join("config").join("keys")).unwrap();
        std::fs::write(
            root.join("config").join("keys").join("aws.env"),
            "AKIAEXAMPLEKEY=1",
        )
        .unwrap();
        std::fs::write(root.join("readme.md"), "nothing to see").unwrap();
        let root = paths::key(&root);
        scanner::scan(&store, Path::new(&root)).unwrap();

        let results = search(&store, "akiaexamplekey", None).unwrap();
        let keys = format!("{root}/config/keys");
        let bubbled = results.iter().find(|h| h.path == keys).unwrap();
        assert_eq!(bubbled.kind, EntryKind::Folder);
        assert!(paths_of(&results).contains(&root.as_str()));
        assert!(
            results
                .iter()
                .all(|h| paths::is_within(&h.path, &root))
        );
    }

    #[test]
    fn bubbled_folders_respect_root_scope() {
        let (_db, store) = test_store();
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("proj");
        let inner = root.join("inner");
        std::fs::create_dir_all(&inner).unwrap();
        std::fs::write(inner.join("notes.md"), "zanzibar itinerary").unwrap();
        let root = paths::key(&root);
        let inner = paths::key(&inner);
        scanner::scan(&store, Path::new(&root)).unwrap();

        let results = search(&store, "zanzibar", Some(&inner)).unwrap();
        assert!(paths_of(&results).contains(&inner.as_str()));
        assert!(!paths_of(&results).contains(&root.as_str()));
    }

    #[test]
    fn structured_filter_with_path_prefix() {
        let (_db, store) = test_store();
        store.upsert_folder(Path::new("/r"), 0, 0).unwrap();
        store
            .upsert_file(Path::new("/r/budget_2024.csv"), "rent,food", stat())
            .unwrap();
        store
            .upsert_file(Path::new("/r/notes.md"), "nothing", stat())
            .unwrap();

        let results = search(
            &store,
            "(path:budget* OR content:budget OR summary:budget)",
            None,
        )
        .unwrap();
        assert_eq!(results[0].path, "/r/budget_2024.csv");
        assert!(!paths_of(&results).contains(&"/r/notes.md"));
    }

    #[test]
    fn path_prefix_leaves_match_inside_file_names() {
        let (_db, store) = test_store();
        store
            .upsert_file(Path::new("/r/budget_2024.csv"), "rent,food", stat())
            .unwrap();
        store
            .upsert_file(Path::new("/r/notes.md"), "nothing", stat())
            .unwrap();

        let parsed = search(&store, "(path:udget* OR content:zzz)", None)
            .unwrap();
        assert_eq!(paths_of(&parsed), vec!["/r/budget_2024.csv"]);

        // Unbalanced input still gets its path tokens matched.
        let unparsed = search(&store, "(path:udget* OR content:zzz", None)
            .unwrap();
        assert_eq!(paths_of(&unparsed), vec!["/r/budget_2024.csv"]);

        let exact = search(&store, "(path:udget OR content:zzz)", None)
            .unwrap();
        assert!(exact.is_empty());
    }

    #[test]
    fn extension_alias_lists_every_file_of_a_type() {
        let (_db, store) = test_store();
        for i in 0..3 {
            store
                .upsert_file(
                    Path::new(&format!("/r/q{i}.sql")),
                    "select 1",
                    stat(),
                )
                .unwrap();
        }
        store.upsert_file(Path::new("/r/a.md"), "sql notes", stat()).unwrap();

        let results = search(&store, "SQL files", None).unwrap();
        let sql: Vec<&SearchHit> =
            results.iter().filter(|h| h.path.ends_with(".sql")).collect();
        assert_eq!(sql.len(), 3);
        assert_eq!(extension_alias("python scripts"), Some("py"));
        assert_eq!(extension_alias("python"), None);
    }

    #[test]
    fn results_are_deduplicated_and_capped() {
        let (_db, store) = test_store();
        for i in 0..30 {
            store
                .upsert_file(
                    Path::new(&format!("/r/report{i:02}.md")),
                    "quarterly report",
                    stat(),
                )
                .unwrap();
        }

        let results = search(&store, "report", None).unwrap();
        assert_eq!(results.len(), MAX_RESULTS);
        let unique: HashSet<&str> = paths_of(&results).into_iter().collect();
        assert_eq!(unique.len(), results.len());
    }

    #[test]
    fn blank_query_returns_nothing() {
        let (_db, store) = test_store();
        assert!(search(&store, "   ", None).unwrap().is_empty());
    }

    #[test]
    fn malformed_filter_does_not_error() {
        let (_db, store) = test_store();
        store.upsert_file(Path::new("/r/a.md"), "hello", stat()).unwrap();
        assert!(search(&store, "(content:hello", None).is_ok());
    }
}
