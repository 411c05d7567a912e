//! Discriminated storage configuration.
//!
//! Tagged by `type`. Older configs tagged by `strategy` (`local-json`,
//! `local-sqlite`, `git-json`, `github`) are normalized on load.

use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{DevlogError, Result};
use crate::git::ConflictStrategy;

/// Accepted `type` values.
pub const STORAGE_TYPES: &[&str] = &["json", "sqlite", "postgres", "mysql", "git", "github"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Json(JsonStorageConfig),
    Sqlite(SqliteStorageConfig),
    Postgres(ServerSqlConfig),
    Mysql(ServerSqlConfig),
    Git(GitStorageConfig),
    Github(GitHubStorageConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonStorageConfig {
    pub directory: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqliteStorageConfig {
    #[serde(alias = "filePath")]
    pub file_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSqlConfig {
    #[serde(alias = "connectionString")]
    pub connection_string: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitCredentials {
    pub username: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitAuthor {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitStorageConfig {
    pub repository: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Directory inside the repository holding entries
    #[serde(default = "default_repo_path")]
    pub path: String,
    /// Clone location; defaults under the local data dir
    #[serde(default, alias = "localPath", skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<GitCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<GitAuthor>,
    #[serde(default, alias = "conflictStrategy")]
    pub conflict_strategy: ConflictStrategy,
    #[serde(default = "default_true", alias = "autoSync")]
    pub auto_sync: bool,
}

impl GitStorageConfig {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            branch: default_branch(),
            path: default_repo_path(),
            local_path: None,
            credentials: None,
            author: None,
            conflict_strategy: ConflictStrategy::default(),
            auto_sync: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    #[serde(alias = "requestsPerHour")]
    pub requests_per_hour: u32,
    #[serde(alias = "retryDelay")]
    pub retry_delay_ms: u64,
    #[serde(alias = "maxRetries")]
    pub max_retries: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_hour: 5000,
            retry_delay_ms: 1000,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    #[serde(alias = "ttl")]
    pub ttl_ms: u64,
    #[serde(alias = "maxEntries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 300_000,
            max_entries: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitHubStorageConfig {
    pub owner: String,
    pub repo: String,
    pub token: String,
    #[serde(default = "default_api_url", alias = "apiUrl")]
    pub api_url: String,
    #[serde(default = "default_label_prefix", alias = "labelsPrefix", alias = "labelPrefix")]
    pub label_prefix: String,
    #[serde(default, alias = "rateLimit")]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl GitHubStorageConfig {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            token: token.into(),
            api_url: default_api_url(),
            label_prefix: default_label_prefix(),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_repo_path() -> String {
    ".devlog".to_string()
}

fn default_true() -> bool {
    true
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_label_prefix() -> String {
    "devlog".to_string()
}

/// Map a legacy `strategy` value onto a `type`.
fn normalize_strategy(strategy: &str) -> &str {
    match strategy {
        "local-json" => "json",
        "local-sqlite" => "sqlite",
        "git-json" => "git",
        other => other,
    }
}

impl StorageConfig {
    /// Short type name, matching the `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageConfig::Json(_) => "json",
            StorageConfig::Sqlite(_) => "sqlite",
            StorageConfig::Postgres(_) => "postgres",
            StorageConfig::Mysql(_) => "mysql",
            StorageConfig::Git(_) => "git",
            StorageConfig::Github(_) => "github",
        }
    }

    pub fn json(directory: impl Into<PathBuf>) -> Self {
        StorageConfig::Json(JsonStorageConfig {
            directory: directory.into(),
        })
    }

    /// Default local store under the platform data dir.
    pub fn default_json() -> Self {
        Self::json(
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("devlog")
                .join("entries"),
        )
    }

    /// Decode from a loosely typed value, accepting `type` or legacy `strategy`.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut map) = value else {
            return Err(DevlogError::Config("storage config must be a mapping".to_string()));
        };

        let tag = match (map.get("type"), map.get("strategy")) {
            (Some(Value::String(t)), _) => t.clone(),
            (None, Some(Value::String(s))) => normalize_strategy(s).to_string(),
            _ => {
                return Err(DevlogError::Config(format!(
                    "storage config needs a 'type' (one of: {})",
                    STORAGE_TYPES.join(", ")
                )));
            }
        };
        map.remove("type");
        map.remove("strategy");

        // Legacy configs nest the backend settings under its own key.
        let body = match map.remove(tag.as_str()) {
            Some(Value::Object(nested)) if map.is_empty() => Value::Object(nested),
            Some(other) => {
                map.insert(tag.clone(), other);
                Value::Object(map)
            }
            None => Value::Object(map),
        };

        let invalid = |e: serde_json::Error| DevlogError::Config(format!("invalid {} storage config: {}", tag, e));
        match tag.as_str() {
            "json" => serde_json::from_value(body).map(StorageConfig::Json).map_err(invalid),
            "sqlite" => serde_json::from_value(body).map(StorageConfig::Sqlite).map_err(invalid),
            "postgres" => serde_json::from_value(body).map(StorageConfig::Postgres).map_err(invalid),
            "mysql" => serde_json::from_value(body).map(StorageConfig::Mysql).map_err(invalid),
            "git" => serde_json::from_value(body).map(StorageConfig::Git).map_err(invalid),
            "github" => serde_json::from_value(body).map(StorageConfig::Github).map_err(invalid),
            other => Err(DevlogError::Config(format!(
                "unknown storage type '{}' (expected one of: {})",
                other,
                STORAGE_TYPES.join(", ")
            ))),
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let value: Value =
            serde_yaml::from_str(content).map_err(|e| DevlogError::Config(format!("invalid YAML: {}", e)))?;
        Self::from_value(value)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::default_json()
    }
}

impl<'de> Deserialize<'de> for StorageConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        StorageConfig::from_value(value).map_err(serde::de::Error::custom)
    }
}
