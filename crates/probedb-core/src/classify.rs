//! Operation classification.
//!
//! Every proxied call is counted under [`Category::ALL`] plus one
//! backend-specific category chosen by a [`Classifier`]. Backends with a
//! fixed command set use a [`TableClassifier`]; free-form statement backends
//! (SQL, PartiQL) use a [`KeywordClassifier`] keyed on the statement's first
//! keyword.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Name of an aggregate bucket. Categories are open-ended strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Category(Cow<'static, str>);

impl Category {
    /// Every recorded call.
    pub const ALL: Category = Category(Cow::Borrowed("ALL"));
    /// Data query (reads).
    pub const DQL: Category = Category(Cow::Borrowed("DQL"));
    /// Data manipulation (writes).
    pub const DML: Category = Category(Cow::Borrowed("DML"));
    /// Data definition (schema, tables, indexes).
    pub const DDL: Category = Category(Cow::Borrowed("DDL"));
    /// Anything else.
    pub const OTHER: Category = Category(Cow::Borrowed("OTHER"));

    /// Create a category.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// Category name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Category {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for Category {
    fn from(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }
}

impl From<String> for Category {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

/// Identity of a proxied call: its record name and, for statement
/// backends, the statement's leading keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    name: String,
    keyword: Option<String>,
}

impl Operation {
    /// An operation from a fixed command set (`GET`, `find`, `PutItem`).
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keyword: None,
        }
    }

    /// A free-form statement. The record name becomes `PREFIX:KEYWORD`,
    /// e.g. `EXEC:SELECT`.
    pub fn statement(prefix: &str, statement: &str) -> Self {
        let keyword = statement_keyword(statement);
        Self {
            name: format!("{}:{}", prefix, keyword),
            keyword: Some(keyword),
        }
    }

    /// Record name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Leading statement keyword, upper-cased.
    pub fn keyword(&self) -> Option<&str> {
        self.keyword.as_deref()
    }
}

/// Extract the first keyword of a statement, upper-cased.
///
/// Leading whitespace, opening parentheses and SQL comments are skipped.
/// Returns an empty string for blank statements.
pub fn statement_keyword(statement: &str) -> String {
    let mut rest = statement;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(comment) = rest.strip_prefix("--") {
            rest = comment.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(comment) = rest.strip_prefix("/*") {
            rest = comment.split_once("*/").map(|(_, tail)| tail).unwrap_or("");
        } else {
            break;
        }
    }

    rest.split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .next()
        .unwrap_or("")
        .to_ascii_uppercase()
}

/// Chooses the backend-specific category of an operation.
pub trait Classifier: Send + Sync {
    /// Classify one operation.
    fn classify(&self, op: &Operation) -> Category;
}

impl<F> Classifier for F
where
    F: Fn(&Operation) -> Category + Send + Sync,
{
    fn classify(&self, op: &Operation) -> Category {
        self(op)
    }
}

/// Keywords classified as data manipulation by default.
pub const DML_KEYWORDS: &[&str] = &["INSERT", "UPDATE", "DELETE", "UPSERT", "REPLACE", "MERGE"];

/// Keywords classified as data definition by default.
pub const DDL_KEYWORDS: &[&str] = &["ALTER", "CREATE", "DROP", "TRUNCATE", "RENAME"];

/// Keywords classified as data query by default.
pub const DQL_KEYWORDS: &[&str] = &["SELECT", "WITH", "SHOW", "DESCRIBE", "EXPLAIN"];

/// Statement-type classifier keyed on the first keyword.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    keywords: HashMap<String, Category>,
    fallback: Category,
}

impl KeywordClassifier {
    /// Classifier with the default DML/DDL/DQL keyword tables.
    pub fn new() -> Self {
        let mut classifier = Self::empty(Category::OTHER);
        for (keywords, category) in [
            (DML_KEYWORDS, Category::DML),
            (DDL_KEYWORDS, Category::DDL),
            (DQL_KEYWORDS, Category::DQL),
        ] {
            for keyword in keywords {
                classifier
                    .keywords
                    .insert((*keyword).to_string(), category.clone());
            }
        }
        classifier
    }

    /// Classifier with no keywords; everything maps to `fallback`.
    pub fn empty(fallback: Category) -> Self {
        Self {
            keywords: HashMap::new(),
            fallback,
        }
    }

    /// Map a keyword to a category, replacing any previous mapping.
    pub fn with_keyword(mut self, keyword: &str, category: impl Into<Category>) -> Self {
        self.keywords
            .insert(keyword.to_ascii_uppercase(), category.into());
        self
    }

    /// Set the category for unknown keywords.
    pub fn with_fallback(mut self, fallback: impl Into<Category>) -> Self {
        self.fallback = fallback.into();
        self
    }

    /// Classify an upper-cased keyword.
    pub fn classify_keyword(&self, keyword: &str) -> Category {
        self.keywords
            .get(keyword)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Classify a raw statement.
    pub fn classify_statement(&self, statement: &str) -> Category {
        self.classify_keyword(&statement_keyword(statement))
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, op: &Operation) -> Category {
        match op.keyword() {
            Some(keyword) => self.classify_keyword(keyword),
            None => self.classify_keyword(&op.name().to_ascii_uppercase()),
        }
    }
}

/// Static operation-name table with an optional statement classifier for
/// operations that carry a keyword.
#[derive(Debug, Clone)]
pub struct TableClassifier {
    table: HashMap<String, Category>,
    statements: Option<KeywordClassifier>,
    fallback: Category,
}

impl TableClassifier {
    /// Empty table falling back to [`Category::OTHER`].
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
            statements: None,
            fallback: Category::OTHER,
        }
    }

    /// Map one operation name.
    pub fn with(mut self, name: &str, category: impl Into<Category>) -> Self {
        self.table.insert(name.to_string(), category.into());
        self
    }

    /// Map several operation names to the same category.
    pub fn with_all(mut self, names: &[&str], category: impl Into<Category>) -> Self {
        let category = category.into();
        for name in names {
            self.table.insert((*name).to_string(), category.clone());
        }
        self
    }

    /// Classify keyword-carrying operations with `statements`.
    pub fn with_statements(mut self, statements: KeywordClassifier) -> Self {
        self.statements = Some(statements);
        self
    }

    /// Set the category for unknown operations.
    pub fn with_fallback(mut self, fallback: impl Into<Category>) -> Self {
        self.fallback = fallback.into();
        self
    }

    /// Number of mapped operation names.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no operation names are mapped.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Default for TableClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for TableClassifier {
    fn classify(&self, op: &Operation) -> Category {
        if let (Some(keyword), Some(statements)) = (op.keyword(), &self.statements) {
            return statements.classify_keyword(keyword);
        }
        self.table
            .get(op.name())
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}
