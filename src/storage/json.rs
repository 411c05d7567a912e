//! Local JSON provider: one `<id>.json` file per entry plus `index.json`.
//!
//! Produces `EntryId::Number` ids from the shared `IdAllocator`, whose
//! counter and lock files live in the same directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::entry_store::{ConsistencyReport, EntryStore, FileLayout};
use super::traits::StorageProvider;
use crate::domain::{DevlogFilter, DevlogStats, Entry, EntryId, matches_text};
use crate::error::Result;
use crate::id::IdAllocator;

pub struct JsonStorageProvider {
    store: EntryStore,
    allocator: IdAllocator,
}

impl JsonStorageProvider {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        Self {
            allocator: IdAllocator::new(&directory),
            store: EntryStore::new(directory, FileLayout::Flat),
        }
    }

    pub fn with_allocator(mut self, allocator: IdAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn directory(&self) -> &Path {
        self.store.root()
    }

    /// Report index/file orphans.
    pub async fn verify(&self) -> Result<ConsistencyReport> {
        self.store.verify().await
    }

    /// Rebuild `index.json` from the entry files.
    pub async fn repair(&self) -> Result<ConsistencyReport> {
        self.store.rebuild_index().await?;
        self.store.verify().await
    }

    async fn allocate_id(&self) -> Result<u64> {
        let id = self.allocator.next().await?;
        let index = self.store.load_index().await?;
        if id > index.last_id {
            return Ok(id);
        }
        // Counter lags the index (copied or restored directory); jump past it.
        tracing::warn!(allocated = id, last_id = index.last_id, "Id counter behind index, resyncing");
        self.allocator.reset(index.last_id).await?;
        self.allocator.next().await
    }
}

#[async_trait]
impl StorageProvider for JsonStorageProvider {
    fn kind(&self) -> &'static str {
        "json"
    }

    async fn initialize(&self) -> Result<()> {
        if self.store.ensure_layout().await? {
            tracing::info!(directory = %self.store.root().display(), "Created JSON storage");
        }
        Ok(())
    }

    async fn exists(&self, id: &EntryId) -> Result<bool> {
        self.store.contains(id.require_number()?).await
    }

    async fn get(&self, id: &EntryId) -> Result<Option<Entry>> {
        self.store.get(id.require_number()?).await
    }

    async fn save(&self, mut entry: Entry) -> Result<Entry> {
        let id = match &entry.id {
            Some(id) => id.require_number()?,
            None => self.allocate_id().await?,
        };
        entry.id = Some(EntryId::Number(id));
        self.store.put(&entry).await?;
        Ok(entry)
    }

    async fn delete(&self, id: &EntryId) -> Result<()> {
        self.store.remove(id.require_number()?).await?;
        Ok(())
    }

    async fn list(&self, filter: &DevlogFilter) -> Result<Vec<Entry>> {
        self.store.list(filter).await
    }

    async fn search(&self, query: &str) -> Result<Vec<Entry>> {
        let mut entries = self.store.list(&DevlogFilter::default()).await?;
        entries.retain(|e| matches_text(e, query));
        Ok(entries)
    }

    async fn stats(&self) -> Result<DevlogStats> {
        self.store.stats().await
    }

    async fn dispose(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DevlogType, Status};
    use crate::error::DevlogError;
    use tempfile::TempDir;

    async fn provider() -> (JsonStorageProvider, TempDir) {
        let temp = TempDir::new().unwrap();
        let provider = JsonStorageProvider::new(temp.path());
        provider.initialize().await.unwrap();
        (provider, temp)
    }

    #[tokio::test]
    async fn test_save_assigns_sequential_ids() {
        let (provider, temp) = provider().await;
        let a = provider.save(Entry::new("A", DevlogType::Task)).await.unwrap();
        let b = provider.save(Entry::new("B", DevlogType::Task)).await.unwrap();
        assert_eq!(a.id, Some(EntryId::Number(1)));
        assert_eq!(b.id, Some(EntryId::Number(2)));
        assert!(temp.path().join("1.json").exists());
        assert!(temp.path().join("index.json").exists());
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (provider, _temp) = provider().await;
        let mut entry = Entry::new("Round trip", DevlogType::Feature);
        entry.tags = vec!["auth".into()];
        entry.context.acceptance_criteria = vec!["login works".into()];
        let saved = provider.save(entry).await.unwrap();
        let loaded = provider.get(saved.id.as_ref().unwrap()).await.unwrap();
        assert_eq!(loaded, Some(saved));
    }

    #[tokio::test]
    async fn test_save_twice_is_idempotent() {
        let (provider, _temp) = provider().await;
        let saved = provider.save(Entry::new("Once", DevlogType::Task)).await.unwrap();
        provider.save(saved.clone()).await.unwrap();
        assert_eq!(provider.list(&DevlogFilter::default()).await.unwrap().len(), 1);
        assert_eq!(provider.stats().await.unwrap().total_entries, 1);
    }

    #[tokio::test]
    async fn test_delete_keeps_index_and_files_consistent() {
        let (provider, temp) = provider().await;
        let a = provider.save(Entry::new("A", DevlogType::Task)).await.unwrap();
        provider.save(Entry::new("B", DevlogType::Task)).await.unwrap();
        provider.delete(a.id.as_ref().unwrap()).await.unwrap();

        assert!(!provider.exists(a.id.as_ref().unwrap()).await.unwrap());
        assert!(!temp.path().join("1.json").exists());
        assert!(provider.verify().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_search_is_substring() {
        let (provider, _temp) = provider().await;
        let mut e = Entry::new("Login page", DevlogType::Feature);
        e.description = "OAuth via GitHub".into();
        provider.save(e).await.unwrap();
        provider.save(Entry::new("Database index", DevlogType::Task)).await.unwrap();

        let hits = provider.search("oauth").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Login page");
    }

    #[tokio::test]
    async fn test_stats_by_status() {
        let (provider, _temp) = provider().await;
        let mut done = Entry::new("Done", DevlogType::Bugfix);
        done.status = Status::Done;
        provider.save(done).await.unwrap();
        provider.save(Entry::new("Open", DevlogType::Feature)).await.unwrap();

        let stats = provider.stats().await.unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.by_status[&Status::Done], 1);
        assert_eq!(stats.by_type[&DevlogType::Feature], 1);
    }

    #[tokio::test]
    async fn test_opaque_id_rejected() {
        let (provider, _temp) = provider().await;
        let mut e = Entry::new("Legacy", DevlogType::Task);
        e.id = Some(EntryId::Opaque("devlog-abc".into()));
        assert!(matches!(provider.save(e).await, Err(DevlogError::InvalidId(_))));
    }

    #[tokio::test]
    async fn test_counter_behind_index_is_resynced() {
        let (provider, temp) = provider().await;
        let mut e = Entry::new("Imported", DevlogType::Task);
        e.id = Some(EntryId::Number(10));
        provider.save(e).await.unwrap();
        std::fs::remove_file(temp.path().join("id-counter")).ok();

        let next = provider.save(Entry::new("Next", DevlogType::Task)).await.unwrap();
        assert_eq!(next.id, Some(EntryId::Number(11)));
    }
}
