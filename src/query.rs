//! Structured search filters.
//!
//! A [`Filter`] is a conjunction of [`Clause`]s, each a disjunction of
//! `field:value` [`Leaf`]s. Filters are built as trees and only rendered
//! to text at the edges (intent cache, wire, logs):
//!
//! ```
//! use contextual::query::{Clause, Filter, Leaf, QueryField};
//!
//! let mut filter = Filter::default();
//! filter.push(Clause::new(vec![
//!     Leaf::term(QueryField::Created, "2024"),
//!     Leaf::term(QueryField::Modified, "2024"),
//! ]));
//! assert_eq!(
//!     filter.to_string(),
//!     r#"(created:"2024" OR modified:"2024")"#
//! );
//! assert_eq!(Filter::parse(&filter.to_string()).unwrap(), filter);
//! ```

use std::fmt;

/// Searchable fields of the content index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryField {
    Path,
    Kind,
    Ext,
    Content,
    Summary,
    Tech,
    Created,
    Modified,
}

impl QueryField {
    pub const ALL: [QueryField; 8] = [
        Self::Path,
        Self::Kind,
        Self::Ext,
        Self::Content,
        Self::Summary,
        Self::Tech,
        Self::Created,
        Self::Modified,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Kind => "kind",
            Self::Ext => "ext",
            Self::Content => "content",
            Self::Summary => "summary",
            Self::Tech => "tech",
            Self::Created => "created",
            Self::Modified => "modified",
        }
    }

    /// Accepts the canonical names plus the long spellings older filters
    /// used.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "path" => Some(Self::Path),
            "kind" => Some(Self::Kind),
            "ext" | "extension" => Some(Self::Ext),
            "content" => Some(Self::Content),
            "summary" => Some(Self::Summary),
            "tech" | "tech_stack" => Some(Self::Tech),
            "created" | "created_str" => Some(Self::Created),
            "modified" | "modified_str" => Some(Self::Modified),
            _ => None,
        }
    }

    fn always_quoted(self) -> bool {
        matches!(self, Self::Created | Self::Modified)
    }
}

/// A single `field:value` match; `prefix` matches any token starting with
/// the last word of `value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf {
    pub field: QueryField,
    pub value: String,
    pub prefix: bool,
}

impl Leaf {
    pub fn term(field: QueryField, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
            prefix: false,
        }
    }

    pub fn prefix(field: QueryField, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
            prefix: true,
        }
    }
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bare = !self.value.is_empty()
            && self
                .value
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-');
        if bare && !self.field.always_quoted() {
            write!(f, "{}:{}", self.field.name(), self.value)?;
        } else {
            let escaped = self.value.replace('"', "");
            write!(f, "{}:\"{}\"", self.field.name(), escaped)?;
        }
        if self.prefix {
            f.write_str("*")?;
        }
        Ok(())
    }
}

/// Disjunction of leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub leaves: Vec<Leaf>,
}

impl Clause {
    pub fn new(leaves: Vec<Leaf>) -> Self {
        Self { leaves }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, leaf) in self.leaves.iter().enumerate() {
            if i > 0 {
                f.write_str(" OR ")?;
            }
            write!(f, "{leaf}")?;
        }
        f.write_str(")")
    }
}

/// Conjunction of clauses. An empty filter renders as the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub clauses: Vec<Clause>,
}

impl Filter {
    /// Append `clause` unless an identical clause is already present or it
    /// has no leaves.
    pub fn push(&mut self, clause: Clause) {
        if clause.leaves.is_empty() {
            return;
        }
        let rendered = clause.to_string();
        if self.clauses.iter().any(|c| c.to_string() == rendered) {
            return;
        }
        self.clauses.push(clause);
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Values of every prefix leaf on the path field.
    pub fn path_prefixes(&self) -> Vec<&str> {
        self.clauses
            .iter()
            .flat_map(|c| &c.leaves)
            .filter(|l| l.field == QueryField::Path && l.prefix)
            .map(|l| l.value.as_str())
            .collect()
    }

    /// Parse the textual form produced by `Display`.
    ///
    /// Accepts parenthesized or bare `OR` groups joined by `AND` (or by
    /// juxtaposition). Bare words without a field qualifier and nested
    /// parentheses are rejected.
    pub fn parse(input: &str) -> Result<Self, FilterParseError> {
        let tokens = lex(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let mut filter = Filter::default();

        while !parser.at_end() {
            if parser.eat(&Token::And) {
                continue;
            }
            let clause = if parser.eat(&Token::Open) {
                let clause = parser.disjunction()?;
                if !parser.eat(&Token::Close) {
                    return Err(FilterParseError::Unbalanced);
                }
                clause
            } else {
                parser.disjunction()?
            };
            filter.push(clause);
        }

        if filter.is_empty() {
            return Err(FilterParseError::Empty);
        }
        Ok(filter)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                f.write_str(" AND ")?;
            }
            write!(f, "{clause}")?;
        }
        Ok(())
    }
}

/// True when `text` uses field qualifiers or boolean operators and should
/// be treated as a structured filter rather than free text.
pub fn has_structured_syntax(text: &str) -> bool {
    text.contains(':') || text.contains(" AND ") || text.contains(" OR ")
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterParseError {
    #[error("unterminated quoted value")]
    UnterminatedQuote,
    #[error("unbalanced parentheses")]
    Unbalanced,
    #[error("unknown field: {0}")]
    UnknownField(String),
    #[error("expected field:value at token {0}")]
    ExpectedLeaf(usize),
    #[error("empty filter")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    And,
    Or,
    /// `field:value`, with the value possibly quoted, and a trailing `*`.
    Leaf(String, String, bool),
}

fn lex(input: &str) -> Result<Vec<Token>, FilterParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '(' {
            tokens.push(Token::Open);
            i += 1;
            continue;
        }
        if c == ')' {
            tokens.push(Token::Close);
            i += 1;
            continue;
        }

        let start = i;
        while i < chars.len()
            && !chars[i].is_whitespace()
            && !matches!(chars[i], '(' | ')' | ':' | '"')
        {
            i += 1;
        }
        let word: String = chars[start..i].iter().collect();

        if i < chars.len() && chars[i] == ':' {
            i += 1;
            let value = if i < chars.len() && chars[i] == '"' {
                i += 1;
                let value_start = i;
                while i < chars.len() && chars[i] != '"' {
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(FilterParseError::UnterminatedQuote);
                }
                let value: String = chars[value_start..i].iter().collect();
                i += 1;
                value
            } else {
                let value_start = i;
                while i < chars.len()
                    && !chars[i].is_whitespace()
                    && !matches!(chars[i], '(' | ')' | '*')
                {
                    i += 1;
                }
                chars[value_start..i].iter().collect()
            };
            let prefix = i < chars.len() && chars[i] == '*';
            if prefix {
                i += 1;
            }
            tokens.push(Token::Leaf(word, value, prefix));
        } else {
            match word.as_str() {
                "AND" => tokens.push(Token::And),
                "OR" => tokens.push(Token::Or),
                _ => return Err(FilterParseError::ExpectedLeaf(tokens.len())),
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.tokens.get(self.pos) == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn leaf(&mut self) -> Result<Leaf, FilterParseError> {
        match self.tokens.get(self.pos).cloned() {
            Some(Token::Leaf(field, value, prefix)) => {
                self.pos += 1;
                let field = QueryField::from_name(&field)
                    .ok_or(FilterParseError::UnknownField(field))?;
                Ok(Leaf {
                    field,
                    value,
                    prefix,
                })
            }
            _ => Err(FilterParseError::ExpectedLeaf(self.pos)),
        }
    }

    fn disjunction(&mut self) -> Result<Clause, FilterParseError> {
        let mut leaves = vec![self.leaf()?];
        while self.eat(&Token::Or) {
            leaves.push(self.leaf()?);
        }
        Ok(Clause::new(leaves))
    }
}
