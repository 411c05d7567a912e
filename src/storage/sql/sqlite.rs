//! Embedded SQL engine via rusqlite.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection;
use rusqlite::types::{Value, ValueRef};

use super::{SqlConnector, SqlDriver, SqlRow, SqlValue};
use crate::error::{DevlogError, Result};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One rusqlite connection. Calls are short and never hold the lock
/// across an await point.
pub struct SqliteDriver {
    conn: Mutex<Connection>,
}

impl SqliteDriver {
    /// Open (creating if needed) the database file, or `:memory:`.
    pub fn open(target: &str) -> Result<Self> {
        let conn = if target == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(target).parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open(target)?
        };
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| DevlogError::BackendUnavailable("sqlite connection poisoned".to_string()))?;
        f(&conn)
    }

    fn execute_sync(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        self.with_conn(|conn| {
            let changed = conn.execute(sql, rusqlite::params_from_iter(params.iter().map(to_value)))?;
            Ok(changed as u64)
        })
    }

    fn query_sync(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();
            let mut rows = stmt.query(rusqlite::params_from_iter(params.iter().map(to_value)))?;

            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut columns = HashMap::with_capacity(names.len());
                for (i, name) in names.iter().enumerate() {
                    columns.insert(name.clone(), from_value_ref(row.get_ref(i)?));
                }
                out.push(SqlRow::new(columns));
            }
            Ok(out)
        })
    }
}

fn to_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Integer(*i),
        SqlValue::Real(f) => Value::Real(*f),
        SqlValue::Text(s) => Value::Text(s.clone()),
    }
}

fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
    }
}

#[async_trait]
impl SqlDriver for SqliteDriver {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        self.execute_sync(sql, params)
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        self.query_sync(sql, params)
    }
}

/// Connector for the embedded engine; always available.
#[derive(Debug, Clone, Default)]
pub struct SqliteConnector;

#[async_trait]
impl SqlConnector for SqliteConnector {
    async fn connect(&self, target: &str) -> Result<Arc<dyn SqlDriver>> {
        tracing::debug!(target_path = target, "Opening sqlite database");
        Ok(Arc::new(SqliteDriver::open(target)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_execute_and_query() {
        let driver = SqliteDriver::open(":memory:").unwrap();
        driver
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score REAL)", &[])
            .await
            .unwrap();
        let changed = driver
            .execute(
                "INSERT INTO t (id, name, score) VALUES (?, ?, ?)",
                &[SqlValue::Integer(1), SqlValue::from("one"), SqlValue::Null],
            )
            .await
            .unwrap();
        assert_eq!(changed, 1);

        let rows = driver.query("SELECT id, name, score FROM t", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].integer("id"), Some(1));
        assert_eq!(rows[0].text("name"), Some("one".to_string()));
        assert_eq!(rows[0].get("score"), Some(&SqlValue::Null));
    }

    #[tokio::test]
    async fn test_connector_creates_parent_dirs() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/dir/devlog.db");
        let driver = SqliteConnector.connect(path.to_str().unwrap()).await.unwrap();
        driver.execute("CREATE TABLE t (x INTEGER)", &[]).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_bad_sql_is_an_error() {
        let driver = SqliteDriver::open(":memory:").unwrap();
        let err = driver.query("SELEKT 1", &[]).await.unwrap_err();
        assert!(matches!(err, DevlogError::Sqlite(_)));
    }
}
