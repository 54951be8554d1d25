//! Relational (SQL) capability.
//!
//! Statements are recorded as `EXEC:<KW>`, `QUERY:<KW>` or `BATCH:<KW>`
//! where `KW` is the statement's leading keyword, and classified by that
//! keyword.

use async_trait::async_trait;
use probedb_core::{
    Classifier, InstrumentConfig, Instrumented, KeywordClassifier, Operation, Payload,
    SharedMetricsRegistry,
};
use serde::{Deserialize, Serialize};

/// A SQL parameter or column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Blob(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Result set of a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl Rows {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in row `row`.
    pub fn get(&self, row: usize, column: &str) -> Option<&SqlValue> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(index)
    }
}

/// Operations a SQL connection exposes.
#[async_trait]
pub trait RelationalBackend: Send + Sync {
    /// Backend error, surfaced unchanged by proxies.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Run one statement, returning the number of affected rows.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, Self::Error>;

    /// Run one query, returning its rows.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Rows, Self::Error>;

    /// Run several `;`-separated statements without parameters.
    async fn execute_batch(&self, sql: &str) -> Result<(), Self::Error>;
}

/// Wrap a SQL backend with keyword classification.
pub fn instrument<B: RelationalBackend>(
    backend: B,
    registry: SharedMetricsRegistry,
) -> Instrumented<B, KeywordClassifier> {
    Instrumented::new(backend, registry, KeywordClassifier::new())
        .with_config(InstrumentConfig::new("sql"))
}

fn statement(sql: &str, params: &[SqlValue]) -> Payload {
    Payload::new().arg("sql", sql).arg("params", params)
}

#[async_trait]
impl<B, C> RelationalBackend for Instrumented<B, C>
where
    B: RelationalBackend,
    C: Classifier,
{
    type Error = B::Error;

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, Self::Error> {
        self.observe(
            Operation::statement("EXEC", sql),
            || statement(sql, params),
            self.inner().execute(sql, params),
            |n| Payload::new().arg("rows_affected", n),
        )
        .await
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Rows, Self::Error> {
        self.observe(
            Operation::statement("QUERY", sql),
            || statement(sql, params),
            self.inner().query(sql, params),
            Payload::of,
        )
        .await
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), Self::Error> {
        self.observe(
            Operation::statement("BATCH", sql),
            || Payload::new().arg("sql", sql),
            self.inner().execute_batch(sql),
            |_| Payload::new(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sql_value_serializes_untagged() {
        let values = vec![
            SqlValue::Null,
            SqlValue::from(1i64),
            SqlValue::from(1.5f64),
            SqlValue::from("a"),
            SqlValue::from(None::<i64>),
        ];
        assert_eq!(
            serde_json::to_value(&values).unwrap(),
            json!([null, 1, 1.5, "a", null])
        );
    }

    #[test]
    fn test_rows_get() {
        let rows = Rows {
            columns: vec!["id".into(), "name".into()],
            rows: vec![vec![SqlValue::Integer(1), SqlValue::from("ada")]],
        };
        assert_eq!(rows.get(0, "name"), Some(&SqlValue::from("ada")));
        assert_eq!(rows.get(0, "missing"), None);
        assert_eq!(rows.get(1, "id"), None);
    }
}
