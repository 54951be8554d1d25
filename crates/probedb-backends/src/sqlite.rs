//! SQLite relational backend.
//!
//! A single `rusqlite` connection behind a mutex. Statements run on tokio's
//! blocking pool so a slow query never stalls the async workers; errors are
//! `rusqlite::Error`, unchanged.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};

use crate::relational::{RelationalBackend, Rows, SqlValue};

/// SQLite connection implementing [`RelationalBackend`].
///
/// Must be used from within a tokio runtime. A statement whose future is
/// dropped still runs to completion on the blocking pool.
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open a private in-memory database.
    pub fn open_in_memory() -> rusqlite::Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> rusqlite::Result<Self> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> rusqlite::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        match tokio::task::spawn_blocking(move || f(&conn.lock())).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ABORT),
                Some("runtime shut down before the statement ran".to_string()),
            )),
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(v) => ToSqlOutput::from(*v),
            SqlValue::Real(v) => ToSqlOutput::from(*v),
            SqlValue::Text(v) => ToSqlOutput::from(v.as_str()),
            SqlValue::Blob(v) => ToSqlOutput::from(v.as_slice()),
        })
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(v) => SqlValue::Integer(v),
            ValueRef::Real(v) => SqlValue::Real(v),
            ValueRef::Text(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => SqlValue::Blob(v.to_vec()),
        }
    }
}

#[async_trait]
impl RelationalBackend for SqliteBackend {
    type Error = rusqlite::Error;

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> rusqlite::Result<u64> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.with_conn(move |conn| {
            let changed = conn.execute(&sql, params_from_iter(params.iter()))?;
            Ok(changed as u64)
        })
        .await
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> rusqlite::Result<Rows> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let columns: Vec<String> =
                stmt.column_names().into_iter().map(String::from).collect();
            let width = columns.len();

            let mut rows = Vec::new();
            let mut cursor = stmt.query(params_from_iter(params.iter()))?;
            while let Some(row) = cursor.next()? {
                let values = (0..width)
                    .map(|i| row.get_ref(i).map(SqlValue::from))
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows.push(values);
            }

            Ok(Rows { columns, rows })
        })
        .await
    }

    async fn execute_batch(&self, sql: &str) -> rusqlite::Result<()> {
        let sql = sql.to_string();
        self.with_conn(move |conn| conn.execute_batch(&sql)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    async fn users() -> SqliteBackend {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL, avatar BLOB);",
        )
        .await
        .unwrap();
        db
    }

    #[tokio::test]
    async fn test_execute_and_query() {
        let db = users().await;
        let inserted = db
            .execute(
                "INSERT INTO users (name, score, avatar) VALUES (?1, ?2, ?3), (?4, NULL, NULL)",
                &[
                    SqlValue::from("ada"),
                    SqlValue::from(9.5f64),
                    SqlValue::from(vec![1u8, 2]),
                    SqlValue::from("bob"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let rows = db
            .query("SELECT id, name, score, avatar FROM users ORDER BY id", &[])
            .await
            .unwrap();
        assert_eq!(rows.columns, vec!["id", "name", "score", "avatar"]);
        assert_eq!(
            rows.rows,
            vec![
                vec![
                    SqlValue::Integer(1),
                    SqlValue::from("ada"),
                    SqlValue::Real(9.5),
                    SqlValue::Blob(vec![1, 2]),
                ],
                vec![
                    SqlValue::Integer(2),
                    SqlValue::from("bob"),
                    SqlValue::Null,
                    SqlValue::Null,
                ],
            ]
        );
    }

    #[tokio::test]
    async fn test_errors_pass_through() {
        let db = users().await;
        let err = db.query("SELECT * FROM nope", &[]).await.unwrap_err();
        assert!(err.to_string().contains("no such table"));

        let err = db
            .execute("INSERT INTO users (name) VALUES (?1)", &[SqlValue::Null])
            .await
            .unwrap_err();
        assert!(matches!(err, rusqlite::Error::SqliteFailure(_, _)));
    }

    #[tokio::test]
    async fn test_statements_leave_runtime_thread_free() {
        let db = users().await;

        // With the connection held here, a statement run on this thread
        // would deadlock; on the blocking pool it just waits.
        let held = db.conn.lock();
        let query = db.query("SELECT count(*) FROM users", &[]);
        tokio::pin!(query);
        assert!(tokio::time::timeout(Duration::from_millis(50), &mut query)
            .await
            .is_err());

        drop(held);
        let rows = query.await.unwrap();
        assert_eq!(rows.rows, vec![vec![SqlValue::Integer(0)]]);
    }
}
