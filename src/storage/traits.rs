//! Storage provider contract shared by every backend.

use async_trait::async_trait;

use crate::domain::{DevlogFilter, DevlogStats, Entry, EntryId};
use crate::error::Result;

/// Uniform CRUD + search + stats interface over one backend.
///
/// `save` is an upsert: callers never distinguish create from update. An
/// entry saved without an id gets one assigned by the provider and the
/// stored entry is returned. `list` is ordered by `updatedAt` descending;
/// `search` ordering is provider-defined (relevance for full-text backends).
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Short backend name, e.g. `"json"` or `"github"`.
    fn kind(&self) -> &'static str;

    /// Acquire drivers, clones or remote resources. Idempotent.
    async fn initialize(&self) -> Result<()>;

    async fn exists(&self, id: &EntryId) -> Result<bool> {
        Ok(self.get(id).await?.is_some())
    }

    /// `None` when the entry is absent.
    async fn get(&self, id: &EntryId) -> Result<Option<Entry>>;

    async fn save(&self, entry: Entry) -> Result<Entry>;

    /// Remove the entry. Deleting an absent id is a no-op.
    async fn delete(&self, id: &EntryId) -> Result<()>;

    async fn list(&self, filter: &DevlogFilter) -> Result<Vec<Entry>>;

    async fn search(&self, query: &str) -> Result<Vec<Entry>>;

    async fn stats(&self) -> Result<DevlogStats>;

    /// Release connections and caches.
    async fn dispose(&self) -> Result<()>;
}
