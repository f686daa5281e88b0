use std::{
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    TantivyDocument,
    Term,
    collector::TopDocs,
    doc,
    query::{
        BooleanQuery,
        BoostQuery,
        EmptyQuery,
        Occur,
        PhraseQuery,
        Query,
        QueryParser,
        RegexQuery,
        TermQuery,
    },
    schema::*,
    snippet::SnippetGenerator,
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
        TokenStream,
    },
};

use crate::{
    error::Result,
    query::{Clause, Filter, Leaf, QueryField},
    text_util,
};

const WRITER_MEMORY_BUDGET: usize = 50_000_000;
const SNIPPET_CHARS: usize = 200;

/// Field names used in the schema.
pub mod fields {
    pub const PATH_KEY: &str = "path_key";
    pub const PATH: &str = "path";
    pub const KIND: &str = "kind";
    pub const EXT: &str = "ext";
    pub const CONTENT: &str = "content";
    pub const SUMMARY: &str = "summary";
    pub const TECH: &str = "tech";
    pub const CREATED: &str = "created";
    pub const MODIFIED: &str = "modified";
}

/// Relevance weight per field. Filename matches dominate, then kind and
/// body text, with tech stack and dates barely nudging the ranking.
pub fn field_weight(field: QueryField) -> f32 {
    match field {
        QueryField::Path => 6.0,
        QueryField::Kind => 2.0,
        QueryField::Content => 2.0,
        QueryField::Ext => 1.0,
        QueryField::Summary => 1.0,
        QueryField::Tech => 0.4,
        QueryField::Created => 0.4,
        QueryField::Modified => 0.4,
    }
}

/// The full-text shadow of the registry: one document per registered path.
pub struct ContentIndex {
    index: Index,
    reader: IndexReader,
    fields: SchemaFields,
    writer: Mutex<IndexWriter>,
}

/// Resolved field handles for the schema.
#[derive(Clone, Copy)]
pub struct SchemaFields {
    pub path_key: Field,
    pub path: Field,
    pub kind: Field,
    pub ext: Field,
    pub content: Field,
    pub summary: Field,
    pub tech: Field,
    pub created: Field,
    pub modified: Field,
}

impl SchemaFields {
    pub fn get(&self, field: QueryField) -> Field {
        match field {
            QueryField::Path => self.path,
            QueryField::Kind => self.kind,
            QueryField::Ext => self.ext,
            QueryField::Content => self.content,
            QueryField::Summary => self.summary,
            QueryField::Tech => self.tech,
            QueryField::Created => self.created,
            QueryField::Modified => self.modified,
        }
    }
}

/// A stored content-index document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexedDoc {
    pub path: String,
    pub kind: String,
    pub ext: String,
    pub content: String,
    pub summary: String,
    pub tech_stack: String,
    pub created: String,
    pub modified: String,
}

/// A ranked search hit.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub path: String,
    pub kind: String,
    pub snippet: String,
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();

    let path_key = builder.add_text_field(fields::PATH_KEY, STRING | STORED);

    let words = |tokenizer: &str| {
        TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer(tokenizer)
                    .set_index_option(IndexRecordOption::WithFreqsAndPositions),
            )
            .set_stored()
    };

    let path = builder.add_text_field(fields::PATH, words("words"));
    let kind = builder.add_text_field(fields::KIND, STRING | STORED);
    let ext = builder.add_text_field(fields::EXT, STRING | STORED);
    let content = builder.add_text_field(fields::CONTENT, words("en_stem"));
    let summary = builder.add_text_field(fields::SUMMARY, words("en_stem"));
    let tech = builder.add_text_field(fields::TECH, words("en_stem"));
    let created = builder.add_text_field(fields::CREATED, words("words"));
    let modified = builder.add_text_field(fields::MODIFIED, words("words"));

    let schema = builder.build();
    let fields = SchemaFields {
        path_key,
        path,
        kind,
        ext,
        content,
        summary,
        tech,
        created,
        modified,
    };

    (schema, fields)
}

fn register_tokenizers(index: &Index) {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build();
    index.tokenizers().register("en_stem", en_stem);

    // Paths and date tokens keep their surface form so prefix matches on
    // file names are not defeated by stemming.
    let words = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .build();
    index.tokenizers().register("words", words);
}

impl ContentIndex {
    /// Open or create a content index at the given directory.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let (schema, fields) = build_schema();

        let mmap_dir = tantivy::directory::MmapDirectory::open(dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;
        let index = if Index::exists(&mmap_dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?
        {
            Index::open(mmap_dir)?
        } else {
            Index::create(
                mmap_dir,
                schema,
                tantivy::IndexSettings::default(),
            )?
        };

        Self::from_index(index, fields)
    }

    /// Create an in-memory content index (for testing).
    pub fn open_in_ram() -> Result<Self> {
        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        Self::from_index(index, fields)
    }

    fn from_index(index: Index, fields: SchemaFields) -> Result<Self> {
        register_tokenizers(&index);
        let reader = index.reader()?;
        let writer = index.writer(WRITER_MEMORY_BUDGET)?;

        Ok(Self {
            index,
            reader,
            fields,
            writer: Mutex::new(writer),
        })
    }

    /// Get the resolved field handles.
    pub fn fields(&self) -> SchemaFields {
        self.fields
    }

    fn writer(&self) -> MutexGuard<'_, IndexWriter> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self, writer: &IndexWriter, entry: &IndexedDoc) -> Result<()> {
        let f = self.fields();

        writer.delete_term(Term::from_field_text(f.path_key, &entry.path));
        writer.add_document(doc!(
            f.path_key => entry.path.as_str(),
            f.path => entry.path.as_str(),
            f.kind => entry.kind.as_str(),
            f.ext => entry.ext.as_str(),
            f.content => entry.content.as_str(),
            f.summary => entry.summary.as_str(),
            f.tech => entry.tech_stack.as_str(),
            f.created => entry.created.as_str(),
            f.modified => entry.modified.as_str(),
        ))?;

        Ok(())
    }

    /// Replace the document for `entry.path` and commit.
    pub fn upsert(&self, entry: &IndexedDoc) -> Result<()> {
        let mut writer = self.writer();
        self.add(&writer, entry)?;
        writer.commit()?;
        Ok(())
    }

    /// Replace the document for `entry.path` without committing. It
    /// becomes searchable at the next [`commit`](Self::commit).
    pub fn stage(&self, entry: &IndexedDoc) -> Result<()> {
        let writer = self.writer();
        self.add(&writer, entry)
    }

    pub fn commit(&self) -> Result<()> {
        self.writer().commit()?;
        Ok(())
    }

    /// Drop every document, then write `entries` in a single commit.
    pub fn replace_all(&self, entries: &[IndexedDoc]) -> Result<()> {
        let mut writer = self.writer();
        writer.delete_all_documents()?;
        for entry in entries {
            self.add(&writer, entry)?;
        }
        writer.commit()?;
        Ok(())
    }

    /// Stored document for `path`, if any.
    pub fn get(&self, path: &str) -> Result<Option<IndexedDoc>> {
        let f = self.fields();
        self.reader.reload()?;
        let searcher = self.reader.searcher();

        let query = TermQuery::new(
            Term::from_field_text(f.path_key, path),
            IndexRecordOption::Basic,
        );
        let top_docs = searcher.search(&query, &TopDocs::with_limit(1))?;

        let Some((_, address)) = top_docs.into_iter().next() else {
            return Ok(None);
        };
        let doc: TantivyDocument = searcher.doc(address)?;
        Ok(Some(IndexedDoc {
            path: extract_text(&doc, f.path_key),
            kind: extract_text(&doc, f.kind),
            ext: extract_text(&doc, f.ext),
            content: extract_text(&doc, f.content),
            summary: extract_text(&doc, f.summary),
            tech_stack: extract_text(&doc, f.tech),
            created: extract_text(&doc, f.created),
            modified: extract_text(&doc, f.modified),
        }))
    }

    pub fn num_docs(&self) -> Result<u64> {
        self.reader.reload()?;
        Ok(self.reader.searcher().num_docs())
    }

    /// Run a structured filter, ranked by weighted relevance.
    pub fn search_filter(
        &self,
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<IndexHit>> {
        let query = self.compile(filter)?;
        self.run(query.as_ref(), limit)
    }

    /// Run free text (or filter text our own parser rejected) through
    /// tantivy's query parser over every searchable field.
    pub fn search_text(
        &self,
        text: &str,
        limit: usize,
    ) -> Result<Vec<IndexHit>> {
        let f = self.fields();
        let mut parser = QueryParser::for_index(
            &self.index,
            vec![f.path, f.content, f.summary, f.tech, f.ext],
        );
        for field in QueryField::ALL {
            parser.set_field_boost(f.get(field), field_weight(field));
        }

        let (query, errors) = parser.parse_query_lenient(text);
        if !errors.is_empty() {
            tracing::debug!(?errors, text, "lenient query parse");
        }
        self.run(query.as_ref(), limit)
    }

    /// Documents whose extension is exactly `ext`.
    pub fn search_extension(
        &self,
        ext: &str,
        limit: usize,
    ) -> Result<Vec<IndexHit>> {
        let f = self.fields();
        let query = TermQuery::new(
            Term::from_field_text(f.ext, &ext.to_lowercase()),
            IndexRecordOption::Basic,
        );
        self.run(&query, limit)
    }

    /// Compile a filter into a tantivy query: every clause must match, any
    /// leaf within a clause may.
    pub fn compile(&self, filter: &Filter) -> Result<Box<dyn Query>> {
        if filter.is_empty() {
            return Ok(Box::new(EmptyQuery));
        }

        let mut musts: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for clause in &filter.clauses {
            musts.push((Occur::Must, self.compile_clause(clause)?));
        }
        Ok(Box::new(BooleanQuery::new(musts)))
    }

    fn compile_clause(&self, clause: &Clause) -> Result<Box<dyn Query>> {
        let mut shoulds: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for leaf in &clause.leaves {
            if let Some(query) = self.compile_leaf(leaf)? {
                shoulds.push((Occur::Should, query));
            }
        }
        if shoulds.is_empty() {
            // A clause with nothing to match can never be satisfied.
            return Ok(Box::new(EmptyQuery));
        }
        Ok(Box::new(BooleanQuery::new(shoulds)))
    }

    fn compile_leaf(&self, leaf: &Leaf) -> Result<Option<Box<dyn Query>>> {
        let field = self.fields().get(leaf.field);
        let tokens = match leaf.field {
            QueryField::Kind | QueryField::Ext => {
                let value = leaf.value.trim().trim_start_matches('.');
                if value.is_empty() {
                    Vec::new()
                } else {
                    vec![value.to_lowercase()]
                }
            }
            _ => self.tokenize(field, &leaf.value)?,
        };
        let Some((last, leading)) = tokens.split_last() else {
            return Ok(None);
        };

        let term = |text: &str| Term::from_field_text(field, text);
        let query: Box<dyn Query> = if leaf.prefix {
            let pattern = format!("{}.*", regex::escape(last));
            let regex = RegexQuery::from_pattern(&pattern, field)?;
            if leading.is_empty() {
                Box::new(regex)
            } else {
                let mut parts: Vec<(Occur, Box<dyn Query>)> = leading
                    .iter()
                    .map(|t| {
                        let q: Box<dyn Query> = Box::new(TermQuery::new(
                            term(t),
                            IndexRecordOption::WithFreqs,
                        ));
                        (Occur::Must, q)
                    })
                    .collect();
                parts.push((Occur::Must, Box::new(regex)));
                Box::new(BooleanQuery::new(parts))
            }
        } else if leading.is_empty() {
            Box::new(TermQuery::new(term(last), IndexRecordOption::WithFreqs))
        } else {
            Box::new(PhraseQuery::new(tokens.iter().map(|t| term(t)).collect()))
        };

        Ok(Some(Box::new(BoostQuery::new(query, field_weight(leaf.field)))))
    }

    fn tokenize(&self, field: Field, text: &str) -> Result<Vec<String>> {
        let mut analyzer = self.index.tokenizer_for_field(field)?;
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        Ok(tokens)
    }

    fn run(&self, query: &dyn Query, limit: usize) -> Result<Vec<IndexHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let f = self.fields();
        self.reader.reload()?;
        let searcher = self.reader.searcher();

        let top_docs = searcher.search(query, &TopDocs::with_limit(limit))?;
        let mut snippets =
            SnippetGenerator::create(&searcher, query, f.content)?;
        snippets.set_max_num_chars(SNIPPET_CHARS);

        let mut results = Vec::with_capacity(top_docs.len());
        for (_, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            let content = extract_text(&doc, f.content);
            let fragment =
                snippets.snippet(&content).fragment().trim().to_string();
            let snippet = if fragment.is_empty() {
                text_util::preview(&content, SNIPPET_CHARS)
            } else {
                fragment
            };

            results.push(IndexHit {
                path: extract_text(&doc, f.path_key),
                kind: extract_text(&doc, f.kind),
                snippet,
            });
        }

        Ok(results)
    }
}

impl std::fmt::Debug for ContentIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentIndex").finish_non_exhaustive()
    }
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, content: &str) -> IndexedDoc {
        IndexedDoc {
            path: path.to_string(),
            kind: "file".to_string(),
            ext: crate::paths::extension(path),
            content: content.to_string(),
            created: "2024 Jan 05 Friday".to_string(),
            modified: "2025 Mar 10 Monday".to_string(),
            ..Default::default()
        }
    }

    fn filter(text: &str) -> Filter {
        Filter::parse(text).unwrap()
    }

    fn paths(hits: &[IndexHit]) -> Vec<&str> {
        hits.iter().map(|h| h.path.as_str()).collect()
    }

    #[test]
    fn staged_documents_appear_after_one_commit() {
        let idx = ContentIndex::open_in_ram().unwrap();
        idx.stage(&file("/r/a.md", "alpha")).unwrap();
        idx.stage(&file("/r/b.md", "beta")).unwrap();
        idx.stage(&file("/r/a.md", "alpha again")).unwrap();
        assert_eq!(idx.num_docs().unwrap(), 0);

        idx.commit().unwrap();
        assert_eq!(idx.num_docs().unwrap(), 2);
        assert_eq!(idx.get("/r/a.md").unwrap().unwrap().content, "alpha again");
    }

    #[test]
    fn upsert_replaces_by_path() {
        let idx = ContentIndex::open_in_ram().unwrap();
        idx.upsert(&file("/r/a.md", "old words")).unwrap();
        idx.upsert(&file("/r/a.md", "new words")).unwrap();

        assert_eq!(idx.num_docs().unwrap(), 1);
        assert_eq!(idx.get("/r/a.md").unwrap().unwrap().content, "new words");
        assert!(idx.get("/r/missing.md").unwrap().is_none());
    }

    #[test]
    fn replace_all_drops_previous_documents() {
        let idx = ContentIndex::open_in_ram().unwrap();
        idx.upsert(&file("/r/a.md", "alpha")).unwrap();
        idx.replace_all(&[file("/r/b.md", "beta")]).unwrap();

        assert_eq!(idx.num_docs().unwrap(), 1);
        assert!(idx.get("/r/a.md").unwrap().is_none());
    }

    #[test]
    fn year_clause_matches_date_tokens() {
        let idx = ContentIndex::open_in_ram().unwrap();
        idx.upsert(&file("/r/a.md", "x")).unwrap();

        let hits = idx
            .search_filter(&filter(r#"(created:"2024" OR modified:"2024")"#), 10)
            .unwrap();
        assert_eq!(paths(&hits), vec!["/r/a.md"]);

        let none = idx
            .search_filter(&filter(r#"(created:"2023" OR modified:"2023")"#), 10)
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn day_phrase_matches_only_that_day() {
        let idx = ContentIndex::open_in_ram().unwrap();
        idx.upsert(&file("/r/a.md", "x")).unwrap();

        let day = r#"(created:"2025 Mar 10" OR modified:"2025 Mar 10")"#;
        assert_eq!(idx.search_filter(&filter(day), 10).unwrap().len(), 1);

        let other = r#"(created:"2025 Mar 11" OR modified:"2025 Mar 11")"#;
        assert!(idx.search_filter(&filter(other), 10).unwrap().is_empty());
    }

    #[test]
    fn path_prefix_matches_file_names() {
        let idx = ContentIndex::open_in_ram().unwrap();
        idx.upsert(&file("/r/budgets_2024.csv", "numbers")).unwrap();
        idx.upsert(&file("/r/notes.md", "nothing here")).unwrap();

        let hits = idx.search_filter(&filter("(path:budget*)"), 10).unwrap();
        assert_eq!(paths(&hits), vec!["/r/budgets_2024.csv"]);
    }

    #[test]
    fn clauses_are_conjunctive() {
        let idx = ContentIndex::open_in_ram().unwrap();
        idx.upsert(&file("/r/a.py", "python parser")).unwrap();
        idx.upsert(&file("/r/b.sql", "python schema")).unwrap();

        let hits = idx
            .search_filter(&filter("(ext:py) AND (content:python)"), 10)
            .unwrap();
        assert_eq!(paths(&hits), vec!["/r/a.py"]);
    }

    #[test]
    fn unknown_leaf_values_match_nothing() {
        let idx = ContentIndex::open_in_ram().unwrap();
        idx.upsert(&file("/r/a.py", "python")).unwrap();

        let hits = idx
            .search_filter(&filter(r#"(content:"!!!") AND (ext:py)"#), 10)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn path_weight_beats_content() {
        let idx = ContentIndex::open_in_ram().unwrap();
        idx.upsert(&file("/r/notes.md", "mentions invoice once")).unwrap();
        idx.upsert(&file("/r/invoice.md", "unrelated text")).unwrap();

        let hits = idx
            .search_filter(&filter("(path:invoice OR content:invoice)"), 10)
            .unwrap();
        assert_eq!(hits[0].path, "/r/invoice.md");
    }

    #[test]
    fn free_text_search_and_snippet() {
        let idx = ContentIndex::open_in_ram().unwrap();
        idx.upsert(&file(
            "/r/a.md",
            "The quarterly budget review covers travel spending.",
        ))
        .unwrap();

        let hits = idx.search_text("budget", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].snippet.contains("budget"));
    }

    #[test]
    fn extension_lookup_is_exact() {
        let idx = ContentIndex::open_in_ram().unwrap();
        idx.upsert(&file("/r/schema.sql", "create table")).unwrap();
        idx.upsert(&file("/r/sqlite.md", "notes")).unwrap();

        let hits = idx.search_extension("SQL", 10).unwrap();
        assert_eq!(paths(&hits), vec!["/r/schema.sql"]);
    }

    #[test]
    fn disk_persistence() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("tantivy");

        {
            let idx = ContentIndex::open(&dir).unwrap();
            idx.upsert(&file("/r/a.md", "persistent data")).unwrap();
        }

        {
            let idx = ContentIndex::open(&dir).unwrap();
            let results = idx.search_text("persistent", 10).unwrap();
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].path, "/r/a.md");
        }
    }
}
