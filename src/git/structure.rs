//! On-disk convention inside the devlog repository:
//!
//! ```text
//! <clone>/<path>/
//!   .gitignore
//!   index.json          {entries: {id -> summary}, lastId, version, lastModified}
//!   entries/001-add-login.json
//! ```
//!
//! `lastId` is a high-water mark: ids are reserved from it and it never
//! moves backward, so deleted ids are not reused.

use std::path::{Path, PathBuf};

use crate::domain::{DevlogFilter, DevlogStats, Entry, matches_text};
use crate::error::Result;
use crate::storage::{ConsistencyReport, EntryIndex, EntryStore, FileLayout, INDEX_FILE};

const GITIGNORE: &str = "*.tmp\n";

pub struct RepositoryStructure {
    clone_dir: PathBuf,
    relative: PathBuf,
    store: EntryStore,
}

impl RepositoryStructure {
    pub fn new(clone_dir: impl Into<PathBuf>, path: impl AsRef<Path>) -> Self {
        let clone_dir = clone_dir.into();
        let relative = path.as_ref().to_path_buf();
        Self {
            store: EntryStore::new(clone_dir.join(&relative), FileLayout::Slugged),
            clone_dir,
            relative,
        }
    }

    /// Absolute data root, `<clone>/<path>`.
    pub fn root(&self) -> &Path {
        self.store.root()
    }

    /// Directory holding the entry files.
    pub fn entries_dir(&self) -> PathBuf {
        self.store.entries_dir()
    }

    /// Repo-relative path of the index file.
    pub fn index_relative(&self) -> String {
        self.relative.join(INDEX_FILE).to_string_lossy().into_owned()
    }

    /// Create `entries/`, `index.json` and `.gitignore` when missing.
    /// Returns true when the layout had to be created.
    pub async fn initialize(&self) -> Result<bool> {
        let created = self.store.ensure_layout().await?;
        let gitignore = self.root().join(".gitignore");
        if !tokio::fs::try_exists(&gitignore).await? {
            tokio::fs::write(&gitignore, GITIGNORE).await?;
        }
        if created {
            tracing::info!(root = %self.root().display(), "Created devlog repository layout");
        }
        Ok(created)
    }

    pub async fn next_id(&self) -> Result<u64> {
        self.store.reserve_id().await
    }

    pub async fn load_index(&self) -> Result<EntryIndex> {
        self.store.load_index().await
    }

    pub async fn contains(&self, id: u64) -> Result<bool> {
        self.store.contains(id).await
    }

    pub async fn read(&self, id: u64) -> Result<Option<Entry>> {
        self.store.get(id).await
    }

    /// Write the entry and return its repo-relative path.
    pub async fn write(&self, entry: &Entry) -> Result<String> {
        let filename = self.store.put(entry).await?;
        Ok(self.entry_relative(&filename))
    }

    pub async fn remove(&self, id: u64) -> Result<bool> {
        self.store.remove(id).await
    }

    pub async fn list(&self, filter: &DevlogFilter) -> Result<Vec<Entry>> {
        self.store.list(filter).await
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Entry>> {
        let mut entries = self.store.list(&DevlogFilter::default()).await?;
        entries.retain(|e| matches_text(e, query));
        Ok(entries)
    }

    pub async fn stats(&self) -> Result<DevlogStats> {
        self.store.stats().await
    }

    /// Rebuild the index from `entries/`, e.g. after a conflicted merge.
    pub async fn rebuild_index(&self) -> Result<EntryIndex> {
        self.store.rebuild_index().await
    }

    pub async fn verify(&self) -> Result<ConsistencyReport> {
        self.store.verify().await
    }

    fn entry_relative(&self, filename: &str) -> String {
        let absolute = self.store.entries_dir().join(filename);
        absolute
            .strip_prefix(&self.clone_dir)
            .unwrap_or(&absolute)
            .to_string_lossy()
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DevlogType;
    use crate::domain::EntryId;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_initialize_creates_layout() {
        let temp = TempDir::new().unwrap();
        let structure = RepositoryStructure::new(temp.path(), ".devlog");
        assert!(structure.initialize().await.unwrap());
        assert!(temp.path().join(".devlog/entries").is_dir());
        assert!(temp.path().join(".devlog/index.json").is_file());
        assert!(temp.path().join(".devlog/.gitignore").is_file());
        assert!(!structure.initialize().await.unwrap());
        assert_eq!(structure.index_relative(), ".devlog/index.json");
    }

    #[tokio::test]
    async fn test_write_uses_padded_slug_filenames() {
        let temp = TempDir::new().unwrap();
        let structure = RepositoryStructure::new(temp.path(), ".devlog");
        structure.initialize().await.unwrap();

        let mut entry = Entry::new("Add OAuth login!", DevlogType::Feature);
        entry.id = Some(EntryId::Number(structure.next_id().await.unwrap()));
        let rel = structure.write(&entry).await.unwrap();
        assert_eq!(rel, ".devlog/entries/001-add-oauth-login.json");
        assert!(temp.path().join(&rel).is_file());
    }

    #[tokio::test]
    async fn test_last_id_is_high_water_mark() {
        let temp = TempDir::new().unwrap();
        let structure = RepositoryStructure::new(temp.path(), ".devlog");
        structure.initialize().await.unwrap();

        for title in ["One", "Two"] {
            let mut entry = Entry::new(title, DevlogType::Task);
            entry.id = Some(EntryId::Number(structure.next_id().await.unwrap()));
            structure.write(&entry).await.unwrap();
        }
        assert!(structure.remove(2).await.unwrap());
        assert_eq!(structure.next_id().await.unwrap(), 3);
        assert_eq!(structure.load_index().await.unwrap().last_id, 3);
    }

    #[tokio::test]
    async fn test_rebuild_after_index_damage() {
        let temp = TempDir::new().unwrap();
        let structure = RepositoryStructure::new(temp.path(), ".devlog");
        structure.initialize().await.unwrap();
        let mut entry = Entry::new("Survivor", DevlogType::Task);
        entry.id = Some(EntryId::Number(structure.next_id().await.unwrap()));
        structure.write(&entry).await.unwrap();

        std::fs::write(temp.path().join(".devlog/index.json"), "<<<<<<< HEAD\n{}\n=======\n{}\n>>>>>>> x\n")
            .unwrap();
        let index = structure.rebuild_index().await.unwrap();
        assert_eq!(index.len(), 1);
        assert!(structure.verify().await.unwrap().is_consistent());
        assert_eq!(structure.search("surviv").await.unwrap().len(), 1);
    }
}
