//! One-file-per-entry store with an `index.json` fast path.
//!
//! Shared by the local JSON provider (flat `<id>.json` files) and the git
//! provider (`entries/<paddedId>-<slug>.json`). The index is kept strictly
//! consistent with the entry files after every `put` and `remove`.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry as MapEntry;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::index::{EntryIndex, INDEX_FILE, IndexRecord};
use crate::domain::{DevlogFilter, DevlogStats, Entry, EntryId, slugify, sort_by_updated_desc};
use crate::error::{DevlogError, Result};
use crate::id::now;

/// How entry files are named and where they live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLayout {
    /// `<root>/<id>.json`
    Flat,
    /// `<root>/entries/<000id>-<slug>.json`
    Slugged,
}

/// Orphans in either direction between index rows and entry files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsistencyReport {
    /// Indexed ids whose file is missing
    pub missing_files: Vec<u64>,
    /// Entry files with no index row
    pub unindexed_files: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_files.is_empty() && self.unindexed_files.is_empty()
    }
}

#[derive(Debug, Default)]
struct Scan {
    index: EntryIndex,
    stale: Vec<String>,
    displaced: Vec<(String, Entry)>,
}

#[derive(Debug)]
pub struct EntryStore {
    root: PathBuf,
    layout: FileLayout,
    /// Serializes index read-modify-write within this process.
    index_lock: Mutex<()>,
}

impl EntryStore {
    pub fn new(root: impl Into<PathBuf>, layout: FileLayout) -> Self {
        Self {
            root: root.into(),
            layout,
            index_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    pub fn entries_dir(&self) -> PathBuf {
        match self.layout {
            FileLayout::Flat => self.root.clone(),
            FileLayout::Slugged => self.root.join("entries"),
        }
    }

    pub fn filename_for(&self, id: u64, title: &str) -> String {
        match self.layout {
            FileLayout::Flat => format!("{}.json", id),
            FileLayout::Slugged => {
                let slug: String = slugify(title).chars().take(50).collect();
                let slug = slug.trim_end_matches('-');
                if slug.is_empty() {
                    format!("{:03}.json", id)
                } else {
                    format!("{:03}-{}.json", id, slug)
                }
            }
        }
    }

    fn file_path(&self, filename: &str) -> PathBuf {
        self.entries_dir().join(filename)
    }

    /// Create the root and entries directories and an empty index.
    /// Returns true when anything was created.
    pub async fn ensure_layout(&self) -> Result<bool> {
        let mut created = false;
        if !tokio::fs::try_exists(self.entries_dir()).await? {
            tokio::fs::create_dir_all(self.entries_dir()).await?;
            created = true;
        }
        if !tokio::fs::try_exists(self.index_path()).await? {
            let _guard = self.index_lock.lock().await;
            self.write_index(&mut EntryIndex::default()).await?;
            created = true;
        }
        Ok(created)
    }

    /// Load the index; a missing file is an empty index and an unparsable
    /// one is rebuilt from the entry files.
    pub async fn load_index(&self) -> Result<EntryIndex> {
        match tokio::fs::read_to_string(self.index_path()).await {
            Ok(content) => match EntryIndex::parse(&content) {
                Ok(index) => Ok(index),
                Err(e) => {
                    tracing::warn!(path = %self.index_path().display(), error = %e, "Index unreadable, rebuilding from entry files");
                    self.scan_entries(0).await
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EntryIndex::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_index(&self, index: &mut EntryIndex) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        index.last_modified = Some(now());
        let tmp = self.root.join(format!("{}.tmp", INDEX_FILE));
        tokio::fs::write(&tmp, serde_json::to_string_pretty(index)?).await?;
        tokio::fs::rename(&tmp, self.index_path()).await?;
        Ok(())
    }

    pub async fn read_file(&self, filename: &str) -> Result<Entry> {
        let path = self.file_path(filename);
        let content = tokio::fs::read_to_string(&path).await?;
        serde_json::from_str(&content)
            .map_err(|e| DevlogError::MalformedData(format!("{}: {}", path.display(), e)))
    }

    pub async fn contains(&self, id: u64) -> Result<bool> {
        Ok(self.load_index().await?.contains(id))
    }

    pub async fn get(&self, id: u64) -> Result<Option<Entry>> {
        let index = self.load_index().await?;
        let Some(record) = index.get(id) else {
            return Ok(None);
        };
        match self.read_file(&record.filename).await {
            Ok(entry) => Ok(Some(entry)),
            Err(DevlogError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(id, filename = %record.filename, "Indexed entry file missing");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Reserve an id above the index high-water mark and persist the mark.
    pub async fn reserve_id(&self) -> Result<u64> {
        let _guard = self.index_lock.lock().await;
        let mut index = self.load_index().await?;
        let id = index.reserve_next_id();
        self.write_index(&mut index).await?;
        Ok(id)
    }

    /// Raise the index high-water mark without adding a row.
    pub async fn raise_last_id(&self, id: u64) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        let mut index = self.load_index().await?;
        if index.last_id < id {
            index.last_id = id;
            self.write_index(&mut index).await?;
        }
        Ok(())
    }

    /// Write the entry body, then its index row. The entry must carry an
    /// integer id. Returns the filename written.
    pub async fn put(&self, entry: &Entry) -> Result<String> {
        let id = entry
            .id
            .as_ref()
            .ok_or_else(|| DevlogError::InvalidId("entry has no id".to_string()))?
            .require_number()?;

        let _guard = self.index_lock.lock().await;
        tokio::fs::create_dir_all(self.entries_dir()).await?;

        let filename = self.filename_for(id, &entry.title);
        tokio::fs::write(self.file_path(&filename), serde_json::to_string_pretty(entry)?).await?;

        let mut index = self.load_index().await?;
        let previous = index.upsert(id, IndexRecord::from_entry(entry, filename.clone()));
        self.write_index(&mut index).await?;

        if let Some(previous) = previous
            && previous.filename != filename
        {
            remove_quietly(&self.file_path(&previous.filename)).await;
        }

        tracing::debug!(id, filename = %filename, "Stored entry");
        Ok(filename)
    }

    /// Drop the index row first, then best-effort delete the file.
    /// Returns false when the id was not indexed.
    pub async fn remove(&self, id: u64) -> Result<bool> {
        let _guard = self.index_lock.lock().await;
        let mut index = self.load_index().await?;
        let Some(record) = index.remove(id) else {
            return Ok(false);
        };
        self.write_index(&mut index).await?;
        remove_quietly(&self.file_path(&record.filename)).await;
        tracing::debug!(id, filename = %record.filename, "Removed entry");
        Ok(true)
    }

    /// Load every indexed entry passing `filter`, newest first. Unreadable
    /// files are skipped.
    pub async fn list(&self, filter: &DevlogFilter) -> Result<Vec<Entry>> {
        let index = self.load_index().await?;
        let mut entries = Vec::new();
        for (id, record) in &index.entries {
            if !filter.matches_summary(record.status, record.devlog_type, record.priority) {
                continue;
            }
            match self.read_file(&record.filename).await {
                Ok(entry) if filter.matches(&entry) => entries.push(entry),
                Ok(_) => {}
                Err(e) => tracing::warn!(id, filename = %record.filename, error = %e, "Skipping unreadable entry"),
            }
        }
        sort_by_updated_desc(&mut entries);
        Ok(entries)
    }

    pub async fn stats(&self) -> Result<DevlogStats> {
        let index = self.load_index().await?;
        let mut stats = DevlogStats::default();
        for record in index.entries.values() {
            stats.record(record.status, record.devlog_type, record.priority);
        }
        Ok(stats)
    }

    /// Entry filenames present on disk.
    pub fn entry_files(&self) -> Result<Vec<String>> {
        let pattern = format!(
            "{}/*.json",
            glob::Pattern::escape(&self.entries_dir().to_string_lossy())
        );
        let paths = glob::glob(&pattern).map_err(|e| DevlogError::MalformedData(e.to_string()))?;
        let mut names = Vec::new();
        for path in paths.flatten() {
            if let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) {
                if name != INDEX_FILE {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Index the files on disk.
    ///
    /// Files are the same entry when id and `createdAt` both match (a rename
    /// merged from another clone); the newest copy is indexed and the rest
    /// are stale. Distinct entries sharing an id (two clones allocating the
    /// same number offline) keep the earliest-created one under that id;
    /// the others are returned as displaced.
    async fn scan_files(&self, last_id: u64) -> Result<Scan> {
        let mut scan = Scan::default();
        let mut copies: BTreeMap<(u64, DateTime<Utc>), (String, Entry)> = BTreeMap::new();
        for filename in self.entry_files()? {
            let entry = match self.read_file(&filename).await {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(filename = %filename, error = %e, "Skipping unreadable entry file");
                    continue;
                }
            };
            let Some(id) = entry.id.as_ref().and_then(|id| id.as_number()) else {
                tracing::warn!(filename = %filename, "Entry file without integer id");
                continue;
            };
            match copies.entry((id, entry.created_at)) {
                MapEntry::Vacant(slot) => {
                    slot.insert((filename, entry));
                }
                MapEntry::Occupied(mut slot) => {
                    if slot.get().1.updated_at >= entry.updated_at {
                        scan.stale.push(filename);
                    } else {
                        let (older, _) = slot.insert((filename, entry));
                        scan.stale.push(older);
                    }
                }
            }
        }

        scan.index.last_id = last_id;
        for ((id, _), (filename, entry)) in copies {
            if scan.index.contains(id) {
                scan.displaced.push((filename, entry));
            } else {
                scan.index.upsert(id, IndexRecord::from_entry(&entry, filename));
            }
        }
        Ok(scan)
    }

    async fn scan_entries(&self, last_id: u64) -> Result<EntryIndex> {
        let scan = self.scan_files(last_id).await?;
        for (filename, _) in &scan.displaced {
            tracing::warn!(filename = %filename, "Entry shares an id with another entry, left unindexed");
        }
        Ok(scan.index)
    }

    /// Rebuild the index from the files on disk, keeping the high-water mark.
    /// Stale copies of renamed entries are deleted; displaced entries get a
    /// fresh id above the mark. Every file ends up under its canonical name.
    pub async fn rebuild_index(&self) -> Result<EntryIndex> {
        let _guard = self.index_lock.lock().await;
        let previous = self.load_index().await.map(|i| i.last_id).unwrap_or(0);
        let Scan {
            mut index,
            stale,
            displaced,
        } = self.scan_files(previous).await?;
        for filename in &stale {
            tracing::warn!(filename = %filename, "Removing stale duplicate entry file");
            remove_quietly(&self.file_path(filename)).await;
        }
        for (old_filename, mut entry) in displaced {
            let old_id = entry.id.as_ref().and_then(|id| id.as_number()).unwrap_or_default();
            let id = index.reserve_next_id();
            entry.id = Some(EntryId::Number(id));
            let filename = self.filename_for(id, &entry.title);
            tokio::fs::write(self.file_path(&filename), serde_json::to_string_pretty(&entry)?).await?;
            remove_quietly(&self.file_path(&old_filename)).await;
            index.upsert(id, IndexRecord::from_entry(&entry, filename));
            tracing::warn!(from = old_id, to = id, title = %entry.title, "Renumbered entry whose id was taken");
        }
        let renames: Vec<(u64, String, String)> = index
            .entries
            .iter()
            .filter_map(|(id, record)| {
                let expected = self.filename_for(*id, &record.title);
                (expected != record.filename).then(|| (*id, record.filename.clone(), expected))
            })
            .collect();
        for (id, from, to) in renames {
            tokio::fs::rename(self.file_path(&from), self.file_path(&to)).await?;
            if let Some(record) = index.entries.get_mut(&id) {
                record.filename = to;
            }
        }
        self.write_index(&mut index).await?;
        tracing::info!(entries = index.len(), root = %self.root.display(), "Rebuilt index");
        Ok(index)
    }

    pub async fn verify(&self) -> Result<ConsistencyReport> {
        let index = self.load_index().await?;
        let files = self.entry_files()?;
        let mut report = ConsistencyReport::default();
        for (id, record) in &index.entries {
            if !files.contains(&record.filename) {
                report.missing_files.push(*id);
            }
        }
        for file in files {
            if !index.entries.values().any(|r| r.filename == file) {
                report.unindexed_files.push(file);
            }
        }
        Ok(report)
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove entry file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DevlogType, Status};
    use tempfile::TempDir;

    fn entry(id: u64, title: &str) -> Entry {
        let mut e = Entry::new(title, DevlogType::Task);
        e.id = Some(EntryId::Number(id));
        e
    }

    #[test]
    fn test_filename_patterns() {
        let flat = EntryStore::new("/tmp/x", FileLayout::Flat);
        assert_eq!(flat.filename_for(7, "Anything"), "7.json");
        let slugged = EntryStore::new("/tmp/x", FileLayout::Slugged);
        assert_eq!(slugged.filename_for(7, "Add Login!"), "007-add-login.json");
        assert_eq!(slugged.filename_for(1234, "!!"), "1234.json");
        assert_eq!(slugged.entries_dir(), PathBuf::from("/tmp/x/entries"));
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let temp = TempDir::new().unwrap();
        let store = EntryStore::new(temp.path(), FileLayout::Flat);

        let e = entry(1, "First");
        store.put(&e).await.unwrap();
        assert_eq!(store.get(1).await.unwrap(), Some(e));
        assert!(temp.path().join("1.json").exists());

        assert!(store.remove(1).await.unwrap());
        assert!(store.get(1).await.unwrap().is_none());
        assert!(!temp.path().join("1.json").exists());
        assert!(!store.remove(1).await.unwrap());
    }

    #[tokio::test]
    async fn test_retitle_moves_slugged_file() {
        let temp = TempDir::new().unwrap();
        let store = EntryStore::new(temp.path(), FileLayout::Slugged);

        let mut e = entry(3, "Old name");
        store.put(&e).await.unwrap();
        e.title = "New name".to_string();
        store.put(&e).await.unwrap();

        assert_eq!(store.entry_files().unwrap(), vec!["003-new-name.json".to_string()]);
        assert!(store.verify().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_list_skips_corrupt_files() {
        let temp = TempDir::new().unwrap();
        let store = EntryStore::new(temp.path(), FileLayout::Flat);
        store.put(&entry(1, "Good")).await.unwrap();
        store.put(&entry(2, "Bad")).await.unwrap();
        std::fs::write(temp.path().join("2.json"), "{ not json").unwrap();

        let all = store.list(&DevlogFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Good");
    }

    #[tokio::test]
    async fn test_list_filters_on_summary() {
        let temp = TempDir::new().unwrap();
        let store = EntryStore::new(temp.path(), FileLayout::Flat);
        let mut done = entry(1, "Done");
        done.status = Status::Done;
        store.put(&done).await.unwrap();
        store.put(&entry(2, "Open")).await.unwrap();

        let open = store
            .list(&DevlogFilter::new().with_status(Status::New))
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].title, "Open");
    }

    #[tokio::test]
    async fn test_corrupt_index_rebuilt_from_files() {
        let temp = TempDir::new().unwrap();
        let store = EntryStore::new(temp.path(), FileLayout::Slugged);
        store.put(&entry(1, "One")).await.unwrap();
        store.put(&entry(2, "Two")).await.unwrap();
        std::fs::write(store.index_path(), "<<<<<<< HEAD\n").unwrap();

        let index = store.load_index().await.unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.last_id, 2);
    }

    #[tokio::test]
    async fn test_rebuild_drops_older_duplicate_of_an_id() {
        let temp = TempDir::new().unwrap();
        let store = EntryStore::new(temp.path(), FileLayout::Slugged);
        store.ensure_layout().await.unwrap();

        let older = entry(1, "Old title");
        let mut newer = older.clone();
        newer.title = "New title".to_string();
        newer.updated_at = older.updated_at + chrono::Duration::seconds(1);
        let entries = store.entries_dir();
        std::fs::write(entries.join("001-old-title.json"), serde_json::to_string(&older).unwrap()).unwrap();
        std::fs::write(entries.join("001-new-title.json"), serde_json::to_string(&newer).unwrap()).unwrap();

        let index = store.rebuild_index().await.unwrap();
        assert_eq!(index.get(1).unwrap().filename, "001-new-title.json");
        assert!(!entries.join("001-old-title.json").exists());
        assert!(store.verify().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_rebuild_renumbers_distinct_entries_sharing_an_id() {
        let temp = TempDir::new().unwrap();
        let store = EntryStore::new(temp.path(), FileLayout::Slugged);
        store.ensure_layout().await.unwrap();

        let first = entry(1, "Alice work");
        let mut second = entry(1, "Bob work");
        second.created_at = first.created_at + chrono::Duration::seconds(5);
        second.updated_at = second.created_at;
        let entries = store.entries_dir();
        std::fs::write(entries.join("001-alice-work.json"), serde_json::to_string(&first).unwrap()).unwrap();
        std::fs::write(entries.join("001-bob-work.json"), serde_json::to_string(&second).unwrap()).unwrap();

        let index = store.rebuild_index().await.unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.get(1).unwrap().title, "Alice work");
        assert_eq!(index.get(2).unwrap().filename, "002-bob-work.json");
        assert_eq!(index.last_id, 2);
        assert!(!entries.join("001-bob-work.json").exists());

        let moved = store.get(2).await.unwrap().unwrap();
        assert_eq!(moved.id, Some(EntryId::Number(2)));
        assert_eq!(moved.title, "Bob work");
        assert!(store.verify().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_verify_reports_orphans() {
        let temp = TempDir::new().unwrap();
        let store = EntryStore::new(temp.path(), FileLayout::Flat);
        store.put(&entry(1, "One")).await.unwrap();
        store.put(&entry(2, "Two")).await.unwrap();
        std::fs::remove_file(temp.path().join("2.json")).unwrap();
        std::fs::write(
            temp.path().join("9.json"),
            serde_json::to_string(&entry(9, "Stray")).unwrap(),
        )
        .unwrap();

        let report = store.verify().await.unwrap();
        assert_eq!(report.missing_files, vec![2]);
        assert_eq!(report.unindexed_files, vec!["9.json".to_string()]);

        store.rebuild_index().await.unwrap();
        assert!(store.verify().await.unwrap().is_consistent());
        assert_eq!(store.load_index().await.unwrap().last_id, 9);
    }

    #[tokio::test]
    async fn test_reserve_id_is_monotonic_after_delete() {
        let temp = TempDir::new().unwrap();
        let store = EntryStore::new(temp.path(), FileLayout::Slugged);
        let id = store.reserve_id().await.unwrap();
        store.put(&entry(id, "Temp")).await.unwrap();
        store.remove(id).await.unwrap();
        assert_eq!(store.reserve_id().await.unwrap(), id + 1);
    }
}
