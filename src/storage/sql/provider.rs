//! `StorageProvider` over any `SqlDriver`, parametrized by dialect.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;

use super::dialect::{SqlDialect, WhereBuilder};
use super::sqlite::SqliteConnector;
use super::{SqlConnector, SqlDriver, SqlRow, SqlValue};
use crate::domain::{DevlogFilter, DevlogStats, Entry, EntryId};
use crate::error::{DevlogError, Result};
use crate::id::IdAllocator;
use crate::storage::traits::StorageProvider;

pub struct SqlStorageProvider {
    dialect: SqlDialect,
    target: String,
    connector: Arc<dyn SqlConnector>,
    allocator: Option<IdAllocator>,
    driver: OnceCell<Arc<dyn SqlDriver>>,
}

impl SqlStorageProvider {
    /// Provider for `target` (file path or connection string) opened through
    /// `connector`. Server engines derive ids from `MAX(id)`.
    pub fn new(dialect: SqlDialect, target: impl Into<String>, connector: Arc<dyn SqlConnector>) -> Self {
        Self {
            dialect,
            target: target.into(),
            connector,
            allocator: None,
            driver: OnceCell::new(),
        }
    }

    /// Embedded database file with its id counter alongside.
    pub fn sqlite(file_path: impl AsRef<Path>) -> Self {
        let file_path = file_path.as_ref();
        let dir = match file_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => ".".into(),
        };
        Self::new(
            SqlDialect::Sqlite,
            file_path.to_string_lossy().into_owned(),
            Arc::new(SqliteConnector),
        )
        .with_allocator(IdAllocator::new(dir))
    }

    pub fn with_connector(mut self, connector: Arc<dyn SqlConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_allocator(mut self, allocator: IdAllocator) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    async fn driver(&self) -> Result<&Arc<dyn SqlDriver>> {
        self.driver
            .get_or_try_init(|| async {
                let driver = self.connector.connect(&self.target).await?;
                for statement in self.dialect.schema() {
                    driver.execute(statement, &[]).await?;
                }
                tracing::info!(dialect = %self.dialect, "SQL storage ready");
                Ok::<_, DevlogError>(driver)
            })
            .await
    }

    async fn max_id(&self) -> Result<u64> {
        let rows = self
            .driver()
            .await?
            .query("SELECT COALESCE(MAX(id), 0) AS max_id FROM entries", &[])
            .await?;
        Ok(rows
            .first()
            .and_then(|r| r.integer("max_id"))
            .unwrap_or(0)
            .max(0) as u64)
    }

    async fn allocate_id(&self) -> Result<u64> {
        let max = self.max_id().await?;
        let Some(allocator) = &self.allocator else {
            return Ok(max + 1);
        };
        let id = allocator.next().await?;
        if id > max {
            return Ok(id);
        }
        tracing::warn!(allocated = id, max_id = max, "Id counter behind table, resyncing");
        allocator.reset(max).await?;
        allocator.next().await
    }

    async fn select(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Entry>> {
        let rows = self.driver().await?.query(sql, params).await?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            match row_to_entry(row) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable row"),
            }
        }
        Ok(entries)
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(row: &SqlRow, column: &str) -> Result<DateTime<Utc>> {
    let text = row
        .text(column)
        .ok_or_else(|| DevlogError::MalformedData(format!("missing {}", column)))?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DevlogError::MalformedData(format!("{} '{}': {}", column, text, e)))
}

fn to_json<T: Serialize>(value: &T) -> Result<SqlValue> {
    Ok(SqlValue::Text(serde_json::to_string(value)?))
}

/// Decode a JSON column, falling back to the default on NULL or bad JSON.
fn json_column<T: DeserializeOwned + Default>(row: &SqlRow, column: &str) -> T {
    match row.text(column) {
        Some(text) if !text.trim().is_empty() => serde_json::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!(column, error = %e, "Bad JSON column, using default");
            T::default()
        }),
        _ => T::default(),
    }
}

fn entry_params(id: u64, entry: &Entry) -> Result<Vec<SqlValue>> {
    Ok(vec![
        SqlValue::Integer(id as i64),
        SqlValue::from(entry.key.as_str()),
        SqlValue::from(entry.title.as_str()),
        SqlValue::from(entry.devlog_type.as_str()),
        SqlValue::from(entry.description.as_str()),
        SqlValue::from(entry.status.as_str()),
        SqlValue::from(entry.priority.as_str()),
        SqlValue::Text(format_ts(&entry.created_at)),
        SqlValue::Text(format_ts(&entry.updated_at)),
        SqlValue::from(entry.estimated_hours),
        SqlValue::from(entry.actual_hours),
        SqlValue::from(entry.assignee.clone()),
        to_json(&entry.tags)?,
        to_json(&entry.files)?,
        to_json(&entry.related_devlogs)?,
        to_json(&entry.context)?,
        to_json(&entry.ai_context)?,
        to_json(&entry.external_references)?,
        to_json(&entry.notes)?,
    ])
}

fn row_to_entry(row: &SqlRow) -> Result<Entry> {
    let id = row
        .integer("id")
        .filter(|id| *id > 0)
        .ok_or_else(|| DevlogError::MalformedData("row without id".to_string()))?;
    let title = row
        .text("title")
        .ok_or_else(|| DevlogError::MalformedData(format!("row {} without title", id)))?;

    Ok(Entry {
        id: Some(EntryId::Number(id as u64)),
        key: row.text("entry_key").unwrap_or_default(),
        title,
        devlog_type: row.text("type").and_then(|t| t.parse().ok()).unwrap_or_default(),
        description: row.text("description").unwrap_or_default(),
        status: row.text("status").and_then(|s| s.parse().ok()).unwrap_or_default(),
        priority: row.text("priority").and_then(|p| p.parse().ok()).unwrap_or_default(),
        created_at: parse_ts(row, "created_at")?,
        updated_at: parse_ts(row, "updated_at")?,
        estimated_hours: row.real("estimated_hours"),
        actual_hours: row.real("actual_hours"),
        assignee: row.text("assignee"),
        tags: json_column(row, "tags"),
        notes: json_column(row, "notes"),
        files: json_column(row, "files"),
        related_devlogs: json_column(row, "related_devlogs"),
        context: json_column(row, "context"),
        ai_context: json_column(row, "ai_context"),
        external_references: json_column(row, "external_references"),
    })
}

#[async_trait]
impl StorageProvider for SqlStorageProvider {
    fn kind(&self) -> &'static str {
        match self.dialect {
            SqlDialect::Sqlite => "sqlite",
            SqlDialect::Postgres => "postgres",
            SqlDialect::Mysql => "mysql",
        }
    }

    async fn initialize(&self) -> Result<()> {
        self.driver().await?;
        Ok(())
    }

    async fn get(&self, id: &EntryId) -> Result<Option<Entry>> {
        let id = id.require_number()?;
        let sql = format!(
            "SELECT {} FROM entries WHERE id = {}",
            self.dialect.select_columns(),
            self.dialect.placeholder(1)
        );
        Ok(self.select(&sql, &[SqlValue::Integer(id as i64)]).await?.into_iter().next())
    }

    async fn save(&self, mut entry: Entry) -> Result<Entry> {
        let id = match &entry.id {
            Some(id) => id.require_number()?,
            None => self.allocate_id().await?,
        };
        entry.id = Some(EntryId::Number(id));

        let params = entry_params(id, &entry)?;
        self.driver().await?.execute(&self.dialect.upsert(), &params).await?;
        tracing::debug!(id, dialect = %self.dialect, "Saved entry");
        Ok(entry)
    }

    async fn delete(&self, id: &EntryId) -> Result<()> {
        let id = id.require_number()?;
        let sql = format!("DELETE FROM entries WHERE id = {}", self.dialect.placeholder(1));
        let removed = self.driver().await?.execute(&sql, &[SqlValue::Integer(id as i64)]).await?;
        tracing::debug!(id, removed, "Deleted entry");
        Ok(())
    }

    async fn list(&self, filter: &DevlogFilter) -> Result<Vec<Entry>> {
        let mut builder = WhereBuilder::new(self.dialect);
        let statuses: Vec<&str> = filter.status.iter().map(|s| s.as_str()).collect();
        builder.push_in("status", &statuses);
        let types: Vec<&str> = filter.devlog_type.iter().map(|t| t.as_str()).collect();
        builder.push_in("type", &types);
        let priorities: Vec<&str> = filter.priority.iter().map(|p| p.as_str()).collect();
        builder.push_in("priority", &priorities);
        if let Some(assignee) = &filter.assignee {
            builder.push_cmp("assignee", "=", SqlValue::from(assignee.as_str()));
        }
        builder.push_tags_any(&filter.tags);
        if let Some(from) = &filter.from_date {
            builder.push_cmp("created_at", ">=", SqlValue::Text(format_ts(from)));
        }
        if let Some(to) = &filter.to_date {
            builder.push_cmp("created_at", "<=", SqlValue::Text(format_ts(to)));
        }

        let base = format!("SELECT {} FROM entries", self.dialect.select_columns());
        let (sql, params) = builder.finish(&base);
        self.select(&sql, &params).await
    }

    async fn search(&self, query: &str) -> Result<Vec<Entry>> {
        match self.dialect.search(query) {
            Some((sql, params)) => self.select(&sql, &params).await,
            None => self.list(&DevlogFilter::default()).await,
        }
    }

    async fn stats(&self) -> Result<DevlogStats> {
        let rows = self
            .driver()
            .await?
            .query(
                "SELECT status, type, priority, COUNT(*) AS n FROM entries GROUP BY status, type, priority",
                &[],
            )
            .await?;

        let mut stats = DevlogStats::default();
        for row in &rows {
            let n = row.integer("n").unwrap_or(0).max(0) as usize;
            let status = row.text("status").and_then(|s| s.parse().ok()).unwrap_or_default();
            let devlog_type = row.text("type").and_then(|t| t.parse().ok()).unwrap_or_default();
            let priority = row.text("priority").and_then(|p| p.parse().ok()).unwrap_or_default();
            stats.total_entries += n;
            *stats.by_status.entry(status).or_default() += n;
            *stats.by_type.entry(devlog_type).or_default() += n;
            *stats.by_priority.entry(priority).or_default() += n;
        }
        Ok(stats)
    }

    async fn dispose(&self) -> Result<()> {
        if let Some(driver) = self.driver.get() {
            driver.close().await?;
        }
        Ok(())
    }
}
