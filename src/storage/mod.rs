//! Storage layer for devlog
//!
//! `StorageProvider` is the contract every backend implements; the
//! `ProviderFactory` turns a `StorageConfig` into a provider. The JSON and
//! SQL backends live here, the git and GitHub backends in their own modules.

mod config;
mod entry_store;
mod factory;
mod index;
mod json;
pub mod sql;
mod traits;

pub use config::{
    CacheConfig, GitAuthor, GitCredentials, GitHubStorageConfig, GitStorageConfig, JsonStorageConfig,
    RateLimitConfig, STORAGE_TYPES, ServerSqlConfig, SqliteStorageConfig, StorageConfig,
};
pub use entry_store::{ConsistencyReport, EntryStore, FileLayout};
pub use factory::ProviderFactory;
pub use index::{EntryIndex, INDEX_FILE, INDEX_VERSION, IndexRecord};
pub use json::JsonStorageProvider;
pub use traits::StorageProvider;
