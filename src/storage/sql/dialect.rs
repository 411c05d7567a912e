//! Per-engine SQL text: schema, upsert, placeholders, tag membership and
//! full-text search.

use std::fmt;

use super::SqlValue;

/// Columns of `entries`, in bind order for the upsert.
pub(crate) const COLUMNS: &[&str] = &[
    "id",
    "entry_key",
    "title",
    "type",
    "description",
    "status",
    "priority",
    "created_at",
    "updated_at",
    "estimated_hours",
    "actual_hours",
    "assignee",
    "tags",
    "files",
    "related_devlogs",
    "context",
    "ai_context",
    "external_references",
    "notes",
];

const SQLITE_SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS entries (
        id INTEGER PRIMARY KEY,
        entry_key TEXT NOT NULL DEFAULT '',
        title TEXT NOT NULL,
        type TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL,
        priority TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        estimated_hours REAL,
        actual_hours REAL,
        assignee TEXT,
        tags TEXT NOT NULL DEFAULT '[]',
        files TEXT NOT NULL DEFAULT '[]',
        related_devlogs TEXT NOT NULL DEFAULT '[]',
        context TEXT NOT NULL DEFAULT '{}',
        ai_context TEXT NOT NULL DEFAULT '{}',
        external_references TEXT NOT NULL DEFAULT '[]',
        notes TEXT NOT NULL DEFAULT '[]'
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_entries_status ON entries(status)",
    "CREATE INDEX IF NOT EXISTS idx_entries_type ON entries(type)",
    "CREATE INDEX IF NOT EXISTS idx_entries_priority ON entries(priority)",
    "CREATE INDEX IF NOT EXISTS idx_entries_updated ON entries(updated_at)",
    "CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts USING fts5(title, description, content='entries', content_rowid='id')",
    r#"CREATE TRIGGER IF NOT EXISTS entries_fts_insert AFTER INSERT ON entries BEGIN
        INSERT INTO entries_fts(rowid, title, description) VALUES (new.id, new.title, new.description);
    END"#,
    r#"CREATE TRIGGER IF NOT EXISTS entries_fts_delete AFTER DELETE ON entries BEGIN
        INSERT INTO entries_fts(entries_fts, rowid, title, description) VALUES ('delete', old.id, old.title, old.description);
    END"#,
    r#"CREATE TRIGGER IF NOT EXISTS entries_fts_update AFTER UPDATE ON entries BEGIN
        INSERT INTO entries_fts(entries_fts, rowid, title, description) VALUES ('delete', old.id, old.title, old.description);
        INSERT INTO entries_fts(rowid, title, description) VALUES (new.id, new.title, new.description);
    END"#,
];

const POSTGRES_SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS entries (
        id BIGINT PRIMARY KEY,
        entry_key TEXT NOT NULL DEFAULT '',
        title TEXT NOT NULL,
        type TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL,
        priority TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        estimated_hours DOUBLE PRECISION,
        actual_hours DOUBLE PRECISION,
        assignee TEXT,
        tags TEXT NOT NULL DEFAULT '[]',
        files TEXT NOT NULL DEFAULT '[]',
        related_devlogs TEXT NOT NULL DEFAULT '[]',
        context TEXT NOT NULL DEFAULT '{}',
        ai_context TEXT NOT NULL DEFAULT '{}',
        external_references TEXT NOT NULL DEFAULT '[]',
        notes TEXT NOT NULL DEFAULT '[]',
        search_vector tsvector GENERATED ALWAYS AS (
            to_tsvector('english', coalesce(title, '') || ' ' || coalesce(description, ''))
        ) STORED
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_entries_status ON entries(status)",
    "CREATE INDEX IF NOT EXISTS idx_entries_type ON entries(type)",
    "CREATE INDEX IF NOT EXISTS idx_entries_priority ON entries(priority)",
    "CREATE INDEX IF NOT EXISTS idx_entries_updated ON entries(updated_at)",
    "CREATE INDEX IF NOT EXISTS idx_entries_search ON entries USING GIN (search_vector)",
];

const MYSQL_SCHEMA: &[&str] = &[r#"CREATE TABLE IF NOT EXISTS entries (
        id BIGINT PRIMARY KEY,
        entry_key VARCHAR(255) NOT NULL DEFAULT '',
        title VARCHAR(500) NOT NULL,
        type VARCHAR(32) NOT NULL,
        description TEXT NOT NULL,
        status VARCHAR(32) NOT NULL,
        priority VARCHAR(32) NOT NULL,
        created_at VARCHAR(40) NOT NULL,
        updated_at VARCHAR(40) NOT NULL,
        estimated_hours DOUBLE NULL,
        actual_hours DOUBLE NULL,
        assignee VARCHAR(255) NULL,
        tags JSON,
        files JSON,
        related_devlogs JSON,
        context JSON,
        ai_context JSON,
        external_references JSON,
        notes JSON,
        INDEX idx_entries_status (status),
        INDEX idx_entries_type (type),
        INDEX idx_entries_priority (priority),
        INDEX idx_entries_updated (updated_at),
        FULLTEXT INDEX idx_entries_fulltext (title, description)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"#];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDialect {
    /// Embedded engine (rusqlite, FTS5)
    Sqlite,
    Postgres,
    Mysql,
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlDialect::Sqlite => "sqlite",
            SqlDialect::Postgres => "postgres",
            SqlDialect::Mysql => "mysql",
        };
        write!(f, "{}", name)
    }
}

impl SqlDialect {
    pub fn schema(&self) -> &'static [&'static str] {
        match self {
            SqlDialect::Sqlite => SQLITE_SCHEMA,
            SqlDialect::Postgres => POSTGRES_SCHEMA,
            SqlDialect::Mysql => MYSQL_SCHEMA,
        }
    }

    /// Placeholder for the `n`th (1-based) parameter.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("${}", n),
            SqlDialect::Sqlite | SqlDialect::Mysql => "?".to_string(),
        }
    }

    pub fn select_columns(&self) -> String {
        COLUMNS.join(", ")
    }

    /// Upsert keyed by `id`. SQLite uses `ON CONFLICT DO UPDATE` rather than
    /// `INSERT OR REPLACE` so the FTS update trigger fires.
    pub fn upsert(&self) -> String {
        let columns = COLUMNS.join(", ");
        let values: Vec<String> = (1..=COLUMNS.len()).map(|n| self.placeholder(n)).collect();
        let values = values.join(", ");
        let updates: Vec<String> = COLUMNS[1..]
            .iter()
            .map(|c| match self {
                SqlDialect::Mysql => format!("{c} = VALUES({c})"),
                SqlDialect::Sqlite | SqlDialect::Postgres => format!("{c} = excluded.{c}"),
            })
            .collect();
        let updates = updates.join(", ");

        match self {
            SqlDialect::Mysql => format!(
                "INSERT INTO entries ({columns}) VALUES ({values}) ON DUPLICATE KEY UPDATE {updates}"
            ),
            SqlDialect::Sqlite | SqlDialect::Postgres => format!(
                "INSERT INTO entries ({columns}) VALUES ({values}) ON CONFLICT (id) DO UPDATE SET {updates}"
            ),
        }
    }

    /// Predicate: the JSON `tags` column holds any of the bound tags.
    pub fn tags_any(&self, placeholders: &[String]) -> String {
        match self {
            SqlDialect::Sqlite => format!(
                "EXISTS (SELECT 1 FROM json_each(entries.tags) WHERE json_each.value IN ({}))",
                placeholders.join(", ")
            ),
            SqlDialect::Postgres => format!("tags::jsonb ?| ARRAY[{}]", placeholders.join(", ")),
            SqlDialect::Mysql => {
                let parts: Vec<String> = placeholders
                    .iter()
                    .map(|p| format!("JSON_CONTAINS(tags, JSON_QUOTE({}))", p))
                    .collect();
                format!("({})", parts.join(" OR "))
            }
        }
    }

    /// Relevance-ranked full-text query and its parameters. `None` when
    /// the query has no searchable terms.
    pub fn search(&self, query: &str) -> Option<(String, Vec<SqlValue>)> {
        let terms: Vec<&str> = query.split_whitespace().collect();
        if terms.is_empty() {
            return None;
        }
        let columns = self.select_columns();
        match self {
            SqlDialect::Sqlite => {
                let select: Vec<String> = COLUMNS.iter().map(|c| format!("entries.{c} AS {c}")).collect();
                let match_expr: Vec<String> = terms
                    .iter()
                    .map(|t| format!("\"{}\"*", t.replace('"', "\"\"")))
                    .collect();
                Some((
                    format!(
                        "SELECT {} FROM entries JOIN entries_fts ON entries_fts.rowid = entries.id \
                         WHERE entries_fts MATCH ? ORDER BY bm25(entries_fts)",
                        select.join(", ")
                    ),
                    vec![SqlValue::Text(match_expr.join(" "))],
                ))
            }
            SqlDialect::Postgres => Some((
                format!(
                    "SELECT {columns} FROM entries WHERE search_vector @@ plainto_tsquery('english', $1) \
                     ORDER BY ts_rank(search_vector, plainto_tsquery('english', $1)) DESC"
                ),
                vec![SqlValue::Text(terms.join(" "))],
            )),
            SqlDialect::Mysql => {
                let text = terms.join(" ");
                Some((
                    format!(
                        "SELECT {columns} FROM entries WHERE MATCH(title, description) AGAINST (? IN NATURAL LANGUAGE MODE) \
                         ORDER BY MATCH(title, description) AGAINST (? IN NATURAL LANGUAGE MODE) DESC"
                    ),
                    vec![SqlValue::Text(text.clone()), SqlValue::Text(text)],
                ))
            }
        }
    }
}

/// Incrementally built, parametrized WHERE clause.
pub(crate) struct WhereBuilder {
    dialect: SqlDialect,
    clauses: Vec<String>,
    params: Vec<SqlValue>,
}

impl WhereBuilder {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            clauses: Vec::new(),
            params: Vec::new(),
        }
    }

    fn bind(&mut self, value: SqlValue) -> String {
        self.params.push(value);
        self.dialect.placeholder(self.params.len())
    }

    pub fn push_in(&mut self, column: &str, values: &[&str]) {
        if values.is_empty() {
            return;
        }
        let placeholders: Vec<String> = values.iter().map(|v| self.bind(SqlValue::from(*v))).collect();
        self.clauses.push(format!("{} IN ({})", column, placeholders.join(", ")));
    }

    pub fn push_cmp(&mut self, column: &str, op: &str, value: SqlValue) {
        let placeholder = self.bind(value);
        self.clauses.push(format!("{} {} {}", column, op, placeholder));
    }

    pub fn push_tags_any(&mut self, tags: &[String]) {
        if tags.is_empty() {
            return;
        }
        let placeholders: Vec<String> = tags.iter().map(|t| self.bind(SqlValue::from(t.as_str()))).collect();
        let clause = self.dialect.tags_any(&placeholders);
        self.clauses.push(clause);
    }

    /// `base WHERE ... ORDER BY updated_at DESC`
    pub fn finish(self, base: &str) -> (String, Vec<SqlValue>) {
        let mut sql = base.to_string();
        if !self.clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY updated_at DESC");
        (sql, self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(SqlDialect::Sqlite.placeholder(3), "?");
        assert_eq!(SqlDialect::Mysql.placeholder(3), "?");
        assert_eq!(SqlDialect::Postgres.placeholder(3), "$3");
    }

    #[test]
    fn test_upsert_per_dialect() {
        let sqlite = SqlDialect::Sqlite.upsert();
        assert!(sqlite.contains("ON CONFLICT (id) DO UPDATE SET entry_key = excluded.entry_key"));
        assert!(!sqlite.contains("id = excluded.id,"));

        let mysql = SqlDialect::Mysql.upsert();
        assert!(mysql.contains("ON DUPLICATE KEY UPDATE entry_key = VALUES(entry_key)"));

        let postgres = SqlDialect::Postgres.upsert();
        assert!(postgres.contains("$19"));
        assert!(!postgres.contains("$20"));
    }

    #[test]
    fn test_where_builder_postgres_numbering() {
        let mut builder = WhereBuilder::new(SqlDialect::Postgres);
        builder.push_in("status", &["new", "done"]);
        builder.push_cmp("assignee", "=", SqlValue::from("alice"));
        builder.push_tags_any(&["ui".to_string()]);
        let (sql, params) = builder.finish("SELECT id FROM entries");
        assert_eq!(
            sql,
            "SELECT id FROM entries WHERE status IN ($1, $2) AND assignee = $3 AND tags::jsonb ?| ARRAY[$4] ORDER BY updated_at DESC"
        );
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_where_builder_empty_has_only_order() {
        let (sql, params) = WhereBuilder::new(SqlDialect::Sqlite).finish("SELECT id FROM entries");
        assert_eq!(sql, "SELECT id FROM entries ORDER BY updated_at DESC");
        assert!(params.is_empty());
    }

    #[test]
    fn test_mysql_tags_use_json_contains() {
        let clause = SqlDialect::Mysql.tags_any(&["?".to_string(), "?".to_string()]);
        assert_eq!(
            clause,
            "(JSON_CONTAINS(tags, JSON_QUOTE(?)) OR JSON_CONTAINS(tags, JSON_QUOTE(?)))"
        );
    }

    #[test]
    fn test_sqlite_search_quotes_terms() {
        let (sql, params) = SqlDialect::Sqlite.search("oauth \"login").unwrap();
        assert!(sql.contains("entries_fts MATCH ?"));
        assert_eq!(params, vec![SqlValue::Text("\"oauth\"* \"\"\"login\"*".to_string())]);
        assert!(SqlDialect::Sqlite.search("   ").is_none());
    }

    #[test]
    fn test_mysql_search_binds_twice() {
        let (sql, params) = SqlDialect::Mysql.search("login").unwrap();
        assert!(sql.contains("IN NATURAL LANGUAGE MODE"));
        assert_eq!(params.len(), 2);
    }
}
