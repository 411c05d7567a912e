//! Builds a provider from a `StorageConfig`.
//!
//! Optional capabilities (server SQL drivers, a git runner, a GitHub API
//! client) are injected here; without them the factory falls back to the
//! bundled implementation or to a connector that fails with
//! `BackendUnavailable` on first use.

use std::collections::HashMap;
use std::sync::Arc;

use super::config::StorageConfig;
use super::json::JsonStorageProvider;
use super::sql::{SqlConnector, SqlDialect, SqlStorageProvider, SqliteConnector, UnavailableConnector};
use super::traits::StorageProvider;
use crate::error::Result;
use crate::git::{GitCommandRunner, GitStorageProvider, ProcessGitRunner};
use crate::github::{GitHubApi, GitHubStorageProvider};

pub struct ProviderFactory {
    connectors: HashMap<SqlDialect, Arc<dyn SqlConnector>>,
    git_runner: Arc<dyn GitCommandRunner>,
    github_api: Option<Arc<dyn GitHubApi>>,
}

impl ProviderFactory {
    pub fn new() -> Self {
        let mut connectors: HashMap<SqlDialect, Arc<dyn SqlConnector>> = HashMap::new();
        connectors.insert(SqlDialect::Sqlite, Arc::new(SqliteConnector));
        Self {
            connectors,
            git_runner: Arc::new(ProcessGitRunner),
            github_api: None,
        }
    }

    /// Register the driver used for `dialect`.
    pub fn with_sql_connector(mut self, dialect: SqlDialect, connector: Arc<dyn SqlConnector>) -> Self {
        self.connectors.insert(dialect, connector);
        self
    }

    pub fn with_git_runner(mut self, runner: Arc<dyn GitCommandRunner>) -> Self {
        self.git_runner = runner;
        self
    }

    /// Use `api` instead of the REST client for GitHub storage.
    pub fn with_github_api(mut self, api: Arc<dyn GitHubApi>) -> Self {
        self.github_api = Some(api);
        self
    }

    fn connector(&self, dialect: SqlDialect) -> Arc<dyn SqlConnector> {
        self.connectors
            .get(&dialect)
            .cloned()
            .unwrap_or_else(|| Arc::new(UnavailableConnector::new(dialect)))
    }

    /// Construct the provider without initializing it.
    pub fn create(&self, config: &StorageConfig) -> Result<Arc<dyn StorageProvider>> {
        tracing::debug!(kind = config.kind(), "Creating storage provider");
        let provider: Arc<dyn StorageProvider> = match config {
            StorageConfig::Json(c) => Arc::new(JsonStorageProvider::new(&c.directory)),
            StorageConfig::Sqlite(c) => Arc::new(
                SqlStorageProvider::sqlite(&c.file_path).with_connector(self.connector(SqlDialect::Sqlite)),
            ),
            StorageConfig::Postgres(c) => Arc::new(SqlStorageProvider::new(
                SqlDialect::Postgres,
                &c.connection_string,
                self.connector(SqlDialect::Postgres),
            )),
            StorageConfig::Mysql(c) => Arc::new(SqlStorageProvider::new(
                SqlDialect::Mysql,
                &c.connection_string,
                self.connector(SqlDialect::Mysql),
            )),
            StorageConfig::Git(c) => Arc::new(GitStorageProvider::new(c.clone(), self.git_runner.clone())),
            StorageConfig::Github(c) => match &self.github_api {
                Some(api) => Arc::new(GitHubStorageProvider::with_api(c.clone(), api.clone())),
                None => Arc::new(GitHubStorageProvider::new(c.clone())?),
            },
        };
        Ok(provider)
    }

    /// Construct and initialize.
    pub async fn open_provider(&self, config: &StorageConfig) -> Result<Arc<dyn StorageProvider>> {
        let provider = self.create(config)?;
        provider.initialize().await?;
        tracing::info!(kind = provider.kind(), "Storage provider initialized");
        Ok(provider)
    }
}

impl Default for ProviderFactory {
    fn default() -> Self {
        Self::new()
    }
}
