//! SQL storage: one `entries` table with JSON-encoded composite columns
//! and a full-text index over title + description.
//!
//! Drivers sit behind `SqlDriver`/`SqlConnector` so engines are injected as
//! capabilities: the embedded engine (rusqlite) ships with the crate,
//! server engines must be supplied by the caller and otherwise fail fast
//! with `BackendUnavailable`.

mod dialect;
mod provider;
mod sqlite;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{DevlogError, Result};

pub use dialect::SqlDialect;
pub use provider::SqlStorageProvider;
pub use sqlite::{SqliteConnector, SqliteDriver};

/// A bound parameter or a returned cell.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<Option<f64>> for SqlValue {
    fn from(value: Option<f64>) -> Self {
        value.map(SqlValue::Real).unwrap_or(SqlValue::Null)
    }
}

impl From<Option<String>> for SqlValue {
    fn from(value: Option<String>) -> Self {
        value.map(SqlValue::Text).unwrap_or(SqlValue::Null)
    }
}

/// One result row keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlRow {
    columns: HashMap<String, SqlValue>,
}

impl SqlRow {
    pub fn new(columns: HashMap<String, SqlValue>) -> Self {
        Self { columns }
    }

    pub fn with(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.columns.insert(column.to_string(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns.get(column)
    }

    /// Text value; numbers are rendered, NULL and absent are `None`.
    pub fn text(&self, column: &str) -> Option<String> {
        match self.columns.get(column)? {
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Integer(i) => Some(i.to_string()),
            SqlValue::Real(f) => Some(f.to_string()),
            SqlValue::Null => None,
        }
    }

    pub fn integer(&self, column: &str) -> Option<i64> {
        match self.columns.get(column)? {
            SqlValue::Integer(i) => Some(*i),
            SqlValue::Real(f) => Some(*f as i64),
            SqlValue::Text(s) => s.trim().parse().ok(),
            SqlValue::Null => None,
        }
    }

    pub fn real(&self, column: &str) -> Option<f64> {
        match self.columns.get(column)? {
            SqlValue::Real(f) => Some(*f),
            SqlValue::Integer(i) => Some(*i as f64),
            SqlValue::Text(s) => s.trim().parse().ok(),
            SqlValue::Null => None,
        }
    }
}

/// Opaque read/write/query primitive over one database connection.
#[async_trait]
pub trait SqlDriver: Send + Sync {
    /// Run a statement, returning affected rows.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Opens a driver for a file path or connection string.
#[async_trait]
pub trait SqlConnector: Send + Sync {
    async fn connect(&self, target: &str) -> Result<Arc<dyn SqlDriver>>;
}

/// Default connector for engines whose driver was not injected.
#[derive(Debug, Clone)]
pub struct UnavailableConnector {
    dialect: SqlDialect,
}

impl UnavailableConnector {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }
}

#[async_trait]
impl SqlConnector for UnavailableConnector {
    async fn connect(&self, _target: &str) -> Result<Arc<dyn SqlDriver>> {
        Err(DevlogError::BackendUnavailable(format!(
            "no {} driver registered; supply one with ProviderFactory::with_sql_connector",
            self.dialect
        )))
    }
}
