//! Natural-language queries to structured filters.
//!
//! Resolution is tiered: the intent cache, then fixed rules, then the text
//! generator (strict JSON first, per-field regex repair second), and
//! finally the normalized query itself as free text. Every outcome is
//! cached under the normalized query.

use std::{
    collections::HashMap,
    sync::{LazyLock, Mutex, PoisonError},
    time::{Duration, Instant},
};

use chrono::{Local, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Deserializer};

use crate::{
    ai::SharedGenerator,
    dates,
    query::{Clause, Filter, Leaf, QueryField},
};

/// How long a resolved query stays cached.
pub const CACHE_TTL: Duration = Duration::from_secs(120);

const MONTHS: &[&str] = &[
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

const RELATIVE_DATE_WORDS: &[&str] = &[
    "today",
    "yesterday",
    "week",
    "weeks",
    "month",
    "months",
    "year",
    "years",
];

const FILLER_WORDS: &[&str] = &[
    "files",
    "file",
    "made",
    "created",
    "modified",
    "scripts",
    "script",
    "documents",
    "document",
    "show",
    "me",
    "find",
    "give",
    "list",
    "main",
    "components",
    "component",
    "app",
    "from",
    "in",
    "on",
    "of",
    "the",
    "a",
    "an",
    "today",
    "yesterday",
    "tomorrow",
    "week",
    "month",
    "year",
];

static FILES_FROM_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bfiles\s+(?:from|in)\s+(20\d{2})\b")
        .expect("valid files-from-year regex")
});
static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^20\d{2}$").expect("valid year regex"));
static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("valid non-word regex"));
static REPAIR_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)"?date_?filter"?\s*:\s*(null|"[^"]*"|'[^']*'|\d{4}|\w+)"#)
        .expect("valid date repair regex")
});
static REPAIR_TECH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)"?tech_?filter"?\s*:\s*(null|"[^"]*"|'[^']*'|\w+)"#)
        .expect("valid tech repair regex")
});
static REPAIR_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)"?keywords"?\s*:\s*(null|"[^"]*"|'[^']*'|\w+)"#)
        .expect("valid keywords repair regex")
});

/// Time-bounded memo of resolved filters, keyed by normalized query.
pub struct IntentCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl IntentCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached value for `key`, unless it has expired. Expired entries are
    /// dropped on the way out.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries =
            self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some((value, stored)) if stored.elapsed() < self.ttl => {
                Some(value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: String, value: String) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, (value, Instant::now()));
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IntentCache {
    fn default() -> Self {
        Self::new(CACHE_TTL)
    }
}

impl std::fmt::Debug for IntentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Replace punctuation with spaces and trim.
pub fn clean_string(text: &str) -> String {
    NON_WORD.replace_all(text, " ").trim().to_string()
}

/// Cache key and free-text fallback for a query.
pub fn normalize(query: &str) -> String {
    clean_string(&query.to_lowercase())
}

/// Fixed rewrites that skip the generator entirely.
pub fn rule_filter(query: &str) -> Option<Filter> {
    let lowered = query.trim().to_lowercase();

    if let Some(caps) = FILES_FROM_YEAR.captures(&lowered) {
        let year = &caps[1];
        let mut filter = Filter::default();
        filter.push(Clause::new(vec![
            Leaf::term(QueryField::Created, year),
            Leaf::term(QueryField::Modified, year),
        ]));
        return Some(filter);
    }

    if matches!(normalize(query).as_str(), "budget files" | "budget file") {
        let mut filter = Filter::default();
        filter.push(Clause::new(vec![
            Leaf::prefix(QueryField::Path, "budget"),
            Leaf::term(QueryField::Content, "budget"),
            Leaf::term(QueryField::Summary, "budget"),
            Leaf::term(QueryField::Ext, "csv"),
            Leaf::term(QueryField::Ext, "md"),
        ]));
        return Some(filter);
    }

    None
}

/// Fields the generator may fill in. Either spelling of each key is
/// accepted, and non-string scalars are read as their text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Intent {
    #[serde(default, alias = "dateFilter", deserialize_with = "loose_string")]
    pub date_filter: Option<String>,
    #[serde(default, alias = "techFilter", deserialize_with = "loose_string")]
    pub tech_filter: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub keywords: Option<String>,
}

impl Intent {
    fn is_empty(&self) -> bool {
        self.date_filter.is_none()
            && self.tech_filter.is_none()
            && self.keywords.is_none()
    }
}

fn loose_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => present(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// `None` for blank values and the literal `null`.
fn present(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Decode a generator reply. Tries strict JSON on the outermost brace
/// block, then pulls each field out individually. `None` when neither
/// finds anything.
pub fn decode_intent(reply: &str) -> Option<Intent> {
    let cleaned = reply.replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();

    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}'))
        && start < end
    {
        match serde_json::from_str::<Intent>(&cleaned[start..=end]) {
            Ok(intent) => return Some(intent),
            Err(e) => {
                tracing::debug!(error = %e, "strict intent decode failed")
            }
        }
    }

    let repaired = Intent {
        date_filter: repair_field(&REPAIR_DATE, cleaned),
        tech_filter: repair_field(&REPAIR_TECH, cleaned),
        keywords: repair_field(&REPAIR_KEYWORDS, cleaned),
    };
    (!repaired.is_empty()).then_some(repaired)
}

fn repair_field(pattern: &Regex, text: &str) -> Option<String> {
    let raw = pattern.captures(text)?.get(1)?.as_str();
    let unquoted = raw.trim_matches(|c| c == '"' || c == '\'');
    present(unquoted.to_string())
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// A month name or an abbreviation of one, at least three letters long.
fn is_month_word(word: &str) -> bool {
    word.len() >= 3 && MONTHS.iter().any(|m| m.starts_with(word))
}

fn is_year(word: &str) -> bool {
    YEAR.is_match(word)
}

/// Compose the filter for a decoded intent.
///
/// Date handling looks at the raw query as well as the intent: a bare
/// year with no month, `today` or `yesterday` becomes a year clause
/// regardless of what the generator said.
pub fn build_filter(
    intent: &Intent,
    raw_query: &str,
    today: NaiveDate,
) -> Filter {
    let mut filter = Filter::default();
    let query_words = words(raw_query);

    let date_triggered = query_words.iter().any(|w| {
        RELATIVE_DATE_WORDS.contains(&w.as_str())
            || is_year(w)
            || is_month_word(w)
    });
    if date_triggered {
        let has_day_word = query_words
            .iter()
            .any(|w| w == "today" || w == "yesterday");
        let has_month = query_words.iter().any(|w| is_month_word(w));
        let year = query_words.iter().find(|w| is_year(w));

        let token = match year {
            Some(year) if !has_month && !has_day_word => Some(year.clone()),
            _ => intent
                .date_filter
                .as_deref()
                .map(|value| date_filter_token(value, today)),
        };
        if let Some(token) = token {
            filter.push(Clause::new(vec![
                Leaf::term(QueryField::Created, token.clone()),
                Leaf::term(QueryField::Modified, token),
            ]));
        }
    }

    let tech = intent
        .tech_filter
        .as_deref()
        .map(clean_string)
        .filter(|t| !t.is_empty());
    if let Some(tech) = &tech {
        let mut leaves = vec![
            Leaf::term(QueryField::Content, tech.clone()),
            Leaf::term(QueryField::Path, tech.clone()),
        ];
        if let Some(ext) = tech_extension(tech) {
            leaves.push(Leaf::term(QueryField::Ext, ext));
            leaves.push(Leaf::term(QueryField::Path, ext));
            leaves.push(Leaf::prefix(QueryField::Path, ext));
        }
        filter.push(Clause::new(leaves));
    }

    if let Some(keywords) = intent.keywords.as_deref() {
        let tech_words = tech.as_deref().map(words).unwrap_or_default();
        let kept: Vec<String> = clean_string(keywords)
            .split_whitespace()
            .filter(|w| {
                let lower = w.to_lowercase();
                !FILLER_WORDS.contains(&lower.as_str())
                    && !is_month_word(&lower)
                    && !tech_words.contains(&lower)
            })
            .map(str::to_string)
            .collect();

        match kept.as_slice() {
            [] => {}
            [word] => filter.push(Clause::new(vec![
                Leaf::prefix(QueryField::Path, word.clone()),
                Leaf::term(QueryField::Ext, word.clone()),
                Leaf::term(QueryField::Content, word.clone()),
                Leaf::term(QueryField::Summary, word.clone()),
            ])),
            many => {
                let phrase = many.join(" ");
                filter.push(Clause::new(vec![
                    Leaf::term(QueryField::Content, phrase.clone()),
                    Leaf::term(QueryField::Summary, phrase.clone()),
                    Leaf::prefix(QueryField::Path, phrase),
                ]));
            }
        }
    }

    filter
}

fn date_filter_token(value: &str, today: NaiveDate) -> String {
    let lowered = value.trim().to_lowercase();
    if lowered.contains("yesterday") {
        return dates::day_token(today.pred_opt().unwrap_or(today));
    }
    if lowered.contains("today") {
        return dates::day_token(today);
    }
    if is_year(&lowered) {
        return lowered;
    }
    dates::parse_date_token(value).unwrap_or(lowered)
}

fn tech_extension(tech: &str) -> Option<&'static str> {
    let ext = match tech.to_lowercase().as_str() {
        "python" => "py",
        "javascript" => "js",
        "typescript" => "ts",
        "react" | "tsx" => "tsx",
        "jsx" => "jsx",
        "sql" => "sql",
        "csv" => "csv",
        "markdown" => "md",
        "json" => "json",
        "yaml" => "yml",
        _ => return None,
    };
    Some(ext)
}

/// Turns natural-language queries into filter text.
pub struct IntentParser {
    generator: SharedGenerator,
    cache: IntentCache,
}

impl IntentParser {
    pub fn new(generator: SharedGenerator, ttl: Duration) -> Self {
        Self {
            generator,
            cache: IntentCache::new(ttl),
        }
    }

    pub fn cache(&self) -> &IntentCache {
        &self.cache
    }

    /// Resolve `query` against today's local date. Never fails: the
    /// normalized query is the last resort.
    pub async fn resolve(&self, query: &str) -> String {
        self.resolve_on(query, Local::now().date_naive()).await
    }

    pub async fn resolve_on(&self, query: &str, today: NaiveDate) -> String {
        let key = normalize(query);
        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!(query = %key, "intent cache hit");
            return hit;
        }

        let resolved = match rule_filter(query) {
            Some(filter) => filter.to_string(),
            None => self.ask_generator(query, &key, today).await,
        };

        tracing::debug!(query = %key, filter = %resolved, "resolved intent");
        self.cache.insert(key, resolved.clone());
        resolved
    }

    async fn ask_generator(
        &self,
        query: &str,
        normalized: &str,
        today: NaiveDate,
    ) -> String {
        let reply = match self.generator.extract_intent(query, today).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "intent extraction failed");
                return normalized.to_string();
            }
        };

        let Some(intent) = decode_intent(&reply) else {
            tracing::debug!(reply = %reply, "undecodable intent reply");
            return normalized.to_string();
        };

        let filter = build_filter(&intent, query, today);
        if filter.is_empty() {
            normalized.to_string()
        } else {
            filter.to_string()
        }
    }
}

impl std::fmt::Debug for IntentParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentParser")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ai::scripted::ScriptedGenerator;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn intent(
        date: Option<&str>,
        tech: Option<&str>,
        kw: Option<&str>,
    ) -> Intent {
        Intent {
            date_filter: date.map(str::to_string),
            tech_filter: tech.map(str::to_string),
            keywords: kw.map(str::to_string),
        }
    }

    fn parser(
        generator: &Arc<ScriptedGenerator>,
        ttl: Duration,
    ) -> IntentParser {
        IntentParser::new(generator.clone(), ttl)
    }

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize("  Python Files!? "), "python files");
        assert_eq!(normalize("schema.sql"), "schema sql");
    }

    #[test]
    fn year_rule() {
        let filter = rule_filter("Show me files from 2024").unwrap();
        assert_eq!(
            filter.to_string(),
            r#"(created:"2024" OR modified:"2024")"#
        );
        assert!(rule_filter("files about 2024").is_none());
    }

    #[test]
    fn budget_rule() {
        let filter = rule_filter("Budget files").unwrap();
        assert_eq!(
            filter.to_string(),
            "(path:budget* OR content:budget OR summary:budget OR ext:csv OR ext:md)"
        );
        assert!(rule_filter("budget files for march").is_none());
    }

    #[test]
    fn strict_decode_handles_fences_and_camel_case() {
        let reply = "```json\n{\"dateFilter\": null, \"techFilter\": \"python\", \"keywords\": \"parser\"}\n```";
        assert_eq!(
            decode_intent(reply).unwrap(),
            intent(None, Some("python"), Some("parser"))
        );
    }

    #[test]
    fn strict_decode_reads_numbers_as_text() {
        let reply = r#"{"date_filter": 2024, "tech_filter": null, "keywords": ""}"#;
        assert_eq!(
            decode_intent(reply).unwrap(),
            intent(Some("2024"), None, None)
        );
    }

    #[test]
    fn repair_pulls_fields_from_broken_json() {
        let reply = r#"Sure! {date_filter: yesterday, tech_filter: 'sql', keywords: "schema",}"#;
        assert_eq!(
            decode_intent(reply).unwrap(),
            intent(Some("yesterday"), Some("sql"), Some("schema"))
        );
    }

    #[test]
    fn repair_accepts_bare_keyword_values() {
        let reply = "{date_filter: null, tech_filter: null, keywords: budget}";
        assert_eq!(
            decode_intent(reply).unwrap(),
            intent(None, None, Some("budget"))
        );
    }

    #[test]
    fn undecodable_reply_is_none() {
        assert!(decode_intent("I cannot help with that.").is_none());
        assert!(decode_intent("{broken").is_none());
    }

    #[test]
    fn tech_clause_adds_extension_leaves() {
        let filter = build_filter(
            &intent(None, Some("Python"), None),
            "python stuff",
            today(),
        );
        assert_eq!(
            filter.to_string(),
            "(content:Python OR path:Python OR ext:py OR path:py OR path:py*)"
        );

        let filter = build_filter(
            &intent(None, Some("rust"), None),
            "rust code",
            today(),
        );
        assert_eq!(filter.to_string(), "(content:rust OR path:rust)");
    }

    #[test]
    fn keyword_clauses_drop_fillers() {
        let filter = build_filter(
            &intent(None, Some("python"), Some("show me python parser files")),
            "show me python parser files",
            today(),
        );
        assert_eq!(
            filter.clauses[1].to_string(),
            "(path:parser* OR ext:parser OR content:parser OR summary:parser)"
        );

        let filter = build_filter(
            &intent(None, None, Some("login flow")),
            "login flow",
            today(),
        );
        assert_eq!(
            filter.to_string(),
            r#"(content:"login flow" OR summary:"login flow" OR path:"login flow"*)"#
        );
    }

    #[test]
    fn only_fillers_leaves_no_clause() {
        let filter = build_filter(
            &intent(None, None, Some("show me files")),
            "show me files",
            today(),
        );
        assert!(filter.is_empty());
    }

    #[test]
    fn relative_days_use_the_given_date() {
        let filter = build_filter(
            &intent(Some("yesterday"), None, None),
            "files changed yesterday",
            today(),
        );
        assert_eq!(
            filter.to_string(),
            r#"(created:"2025 Mar 09" OR modified:"2025 Mar 09")"#
        );

        let filter = build_filter(
            &intent(Some("today"), None, None),
            "what did I touch today",
            today(),
        );
        assert!(filter.to_string().contains(r#"created:"2025 Mar 10""#));
    }

    #[test]
    fn bare_year_overrides_generator_date() {
        let filter = build_filter(
            &intent(Some("2023-05-01"), None, None),
            "notes written in 2024",
            today(),
        );
        assert_eq!(
            filter.to_string(),
            r#"(created:"2024" OR modified:"2024")"#
        );
    }

    #[test]
    fn month_with_year_parses_generator_date() {
        let filter = build_filter(
            &intent(Some("January 2024"), None, None),
            "docs from jan 2024",
            today(),
        );
        assert_eq!(
            filter.to_string(),
            r#"(created:"2024 Jan" OR modified:"2024 Jan")"#
        );
    }

    #[test]
    fn date_ignored_without_trigger_word() {
        let filter = build_filter(
            &intent(Some("2024"), None, Some("invoices")),
            "invoices",
            today(),
        );
        assert_eq!(
            filter.to_string(),
            "(path:invoices* OR ext:invoices OR content:invoices OR summary:invoices)"
        );
    }

    #[test]
    fn cache_expires_entries() {
        let cache = IntentCache::new(Duration::ZERO);
        cache.insert("q".into(), "v".into());
        assert_eq!(cache.get("q"), None);
        assert!(cache.is_empty());

        let cache = IntentCache::default();
        cache.insert("q".into(), "v".into());
        assert_eq!(cache.get("q").as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn rules_skip_the_generator() {
        let generator = Arc::new(ScriptedGenerator::default());
        let parser = parser(&generator, CACHE_TTL);
        let resolved = parser.resolve_on("files from 2023", today()).await;
        assert_eq!(resolved, r#"(created:"2023" OR modified:"2023")"#);
        assert_eq!(generator.intent_calls(), 0);
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let generator = Arc::new(ScriptedGenerator::with_intent(
            r#"{"date_filter": null, "tech_filter": "sql", "keywords": null}"#,
        ));
        let parser = parser(&generator, CACHE_TTL);

        let first = parser.resolve_on("SQL stuff", today()).await;
        let second = parser.resolve_on("sql stuff!", today()).await;
        assert_eq!(first, second);
        assert!(first.contains("ext:sql"));
        assert_eq!(generator.intent_calls(), 1);
    }

    #[tokio::test]
    async fn expired_entries_ask_again() {
        let generator = Arc::new(ScriptedGenerator::with_intent(
            r#"{"keywords": "kanban"}"#,
        ));
        let parser = parser(&generator, Duration::ZERO);
        parser.resolve_on("kanban", today()).await;
        parser.resolve_on("kanban", today()).await;
        assert_eq!(generator.intent_calls(), 2);
    }

    #[tokio::test]
    async fn generator_failure_falls_back_to_normalized_query() {
        let generator = Arc::new(ScriptedGenerator::default());
        let parser = parser(&generator, CACHE_TTL);
        let resolved =
            parser.resolve_on("Where's my TODO list?", today()).await;
        assert_eq!(resolved, "where s my todo list");
        assert_eq!(parser.cache().len(), 1);
    }

    #[tokio::test]
    async fn empty_filter_falls_back_to_normalized_query() {
        let generator = Arc::new(ScriptedGenerator::with_intent(
            r#"{"date_filter": null, "tech_filter": null, "keywords": "files"}"#,
        ));
        let parser = parser(&generator, CACHE_TTL);
        assert_eq!(parser.resolve_on("Files", today()).await, "files");
    }
}
