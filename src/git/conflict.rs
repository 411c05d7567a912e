//! Resolution of merge-conflict markers left in entry files by `git pull`.
//!
//! A conflicted file is split into its complete local and remote versions
//! (every region takes the same side), then one version is chosen per the
//! configured strategy. Resolution never fails on unparsable halves: it
//! keeps the local text.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::Entry;
use crate::error::{DevlogError, Result};

const OURS: &str = "<<<<<<<";
const BASE: &str = "|||||||";
const SEPARATOR: &str = "=======";
const THEIRS: &str = ">>>>>>>";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    LocalWins,
    RemoteWins,
    #[default]
    TimestampWins,
    /// Ask a `ConflictPrompt`; without one, behaves as `TimestampWins`.
    Interactive,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::LocalWins => "local-wins",
            ConflictStrategy::RemoteWins => "remote-wins",
            ConflictStrategy::TimestampWins => "timestamp-wins",
            ConflictStrategy::Interactive => "interactive",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = DevlogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "local-wins" => Ok(ConflictStrategy::LocalWins),
            "remote-wins" => Ok(ConflictStrategy::RemoteWins),
            "timestamp-wins" => Ok(ConflictStrategy::TimestampWins),
            "interactive" => Ok(ConflictStrategy::Interactive),
            other => Err(DevlogError::Config(format!("unknown conflict strategy '{}'", other))),
        }
    }
}

/// Answer from an interactive prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictChoice {
    Local,
    Remote,
    /// Field-level merge via `merge_entries`; falls back to local if either
    /// side is not an entry.
    Merge,
}

/// Hook for the `interactive` strategy.
pub trait ConflictPrompt: Send + Sync {
    fn choose(&self, path: &Path, local: &str, remote: &str) -> ConflictChoice;
}

/// Full local and remote versions of a conflicted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictSides {
    pub local: String,
    pub remote: String,
    pub regions: usize,
}

pub fn has_conflict_markers(content: &str) -> bool {
    content.lines().any(|l| l.starts_with(OURS)) && content.lines().any(|l| l.starts_with(THEIRS))
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Common,
    Ours,
    Base,
    Theirs,
}

/// Split marker-laden text into both complete sides. diff3 base sections
/// are dropped. `None` when the text has no markers.
pub fn split_conflict(content: &str) -> Result<Option<ConflictSides>> {
    let mut local = String::with_capacity(content.len());
    let mut remote = String::with_capacity(content.len());
    let mut section = Section::Common;
    let mut regions = 0;

    for line in content.split_inclusive('\n') {
        match section {
            Section::Common if line.starts_with(OURS) => {
                section = Section::Ours;
                regions += 1;
            }
            Section::Ours if line.starts_with(BASE) => section = Section::Base,
            Section::Ours | Section::Base if line.starts_with(SEPARATOR) => section = Section::Theirs,
            Section::Theirs if line.starts_with(THEIRS) => section = Section::Common,
            Section::Common => {
                local.push_str(line);
                remote.push_str(line);
            }
            Section::Ours => local.push_str(line),
            Section::Base => {}
            Section::Theirs => remote.push_str(line),
        }
    }

    if section != Section::Common {
        return Err(DevlogError::MalformedData("unterminated conflict region".to_string()));
    }
    if regions == 0 {
        return Ok(None);
    }
    Ok(Some(ConflictSides { local, remote, regions }))
}

/// Field-level reconciliation of two versions of one entry.
///
/// Notes are unioned by id and re-sorted by time, tags and files are
/// unioned as sets, `updatedAt` is the max of both, everything else comes
/// from the side updated last (local on a tie).
pub fn merge_entries(local: &Entry, remote: &Entry) -> Entry {
    let (newer, older) = if remote.updated_at > local.updated_at {
        (remote, local)
    } else {
        (local, remote)
    };
    let mut merged = newer.clone();

    for note in &older.notes {
        if !merged.notes.iter().any(|n| n.id == note.id) {
            merged.notes.push(note.clone());
        }
    }
    merged.notes.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    merged.tags = union(&local.tags, &remote.tags);
    merged.files = union(&local.files, &remote.files);
    merged.updated_at = local.updated_at.max(remote.updated_at);
    merged
}

fn union(a: &[String], b: &[String]) -> Vec<String> {
    let mut out = a.to_vec();
    for item in b {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

/// Applies a `ConflictStrategy` to files under a working clone.
#[derive(Clone, Default)]
pub struct ConflictResolver {
    strategy: ConflictStrategy,
    prompt: Option<Arc<dyn ConflictPrompt>>,
}

impl ConflictResolver {
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self { strategy, prompt: None }
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn ConflictPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Resolved text for `content`, or `None` when it has no markers.
    pub fn resolve_content(&self, path: &Path, content: &str) -> Result<Option<String>> {
        let Some(sides) = split_conflict(content)? else {
            return Ok(None);
        };
        tracing::info!(
            path = %path.display(),
            regions = sides.regions,
            strategy = %self.strategy,
            "Resolving merge conflict"
        );

        let resolved = match self.strategy {
            ConflictStrategy::LocalWins => sides.local,
            ConflictStrategy::RemoteWins => sides.remote,
            ConflictStrategy::TimestampWins => newest(path, sides),
            ConflictStrategy::Interactive => match &self.prompt {
                Some(prompt) => match prompt.choose(path, &sides.local, &sides.remote) {
                    ConflictChoice::Local => sides.local,
                    ConflictChoice::Remote => sides.remote,
                    ConflictChoice::Merge => merged(path, sides)?,
                },
                None => {
                    tracing::warn!(path = %path.display(), "No conflict prompt installed, using timestamp-wins");
                    newest(path, sides)
                }
            },
        };
        Ok(Some(resolved))
    }

    /// Resolve one file in place. Returns whether it had markers.
    pub async fn resolve_file(&self, path: &Path) -> Result<bool> {
        let content = tokio::fs::read_to_string(path).await?;
        match self.resolve_content(path, &content)? {
            Some(resolved) => {
                tokio::fs::write(path, resolved).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Resolve the given repo-relative paths under `root`, returning those
    /// that were rewritten.
    pub async fn resolve_paths(&self, root: &Path, paths: &[String]) -> Result<Vec<PathBuf>> {
        let mut resolved = Vec::new();
        for rel in paths {
            let path = root.join(rel);
            if !path.is_file() {
                // Deleted on one side; git keeps whichever side exists.
                tracing::warn!(path = %path.display(), "Conflicted path missing, skipping");
                continue;
            }
            if self.resolve_file(&path).await? {
                resolved.push(path);
            }
        }
        Ok(resolved)
    }

    /// Scan every `*.json` file below `dir` and resolve those with markers.
    pub async fn resolve_directory(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let pattern = format!("{}/**/*.json", glob::Pattern::escape(&dir.to_string_lossy()));
        let paths = glob::glob(&pattern).map_err(|e| DevlogError::MalformedData(format!("bad glob: {}", e)))?;

        let mut resolved = Vec::new();
        for path in paths.flatten() {
            if self.resolve_file(&path).await? {
                resolved.push(path);
            }
        }
        Ok(resolved)
    }
}

/// When the two sides of a conflicted entry file are different entries
/// (both clones created one under the same id and title), keep local in
/// place and write remote beside it as `<stem>.remote.json`. Returns the
/// new file, or `None` when the file is an ordinary conflict.
pub async fn separate_distinct_entries(path: &Path) -> Result<Option<PathBuf>> {
    let content = tokio::fs::read_to_string(path).await?;
    let Some(sides) = split_conflict(&content)? else {
        return Ok(None);
    };
    let Some((local, remote)) = parse_sides(&sides) else {
        return Ok(None);
    };
    if local.created_at == remote.created_at {
        return Ok(None);
    }
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let sibling = path.with_file_name(format!("{}.remote.json", stem));
    tokio::fs::write(path, sides.local).await?;
    tokio::fs::write(&sibling, sides.remote).await?;
    tracing::warn!(
        path = %path.display(),
        remote = %sibling.display(),
        "Conflict holds two distinct entries, keeping both"
    );
    Ok(Some(sibling))
}

fn parse_sides(sides: &ConflictSides) -> Option<(Entry, Entry)> {
    let local = serde_json::from_str::<Entry>(&sides.local).ok()?;
    let remote = serde_json::from_str::<Entry>(&sides.remote).ok()?;
    Some((local, remote))
}

fn newest(path: &Path, sides: ConflictSides) -> String {
    match parse_sides(&sides) {
        Some((local, remote)) if remote.updated_at > local.updated_at => sides.remote,
        Some(_) => sides.local,
        None => {
            tracing::warn!(path = %path.display(), "Conflict halves are not entries, keeping local");
            sides.local
        }
    }
}

fn merged(path: &Path, sides: ConflictSides) -> Result<String> {
    match parse_sides(&sides) {
        Some((local, remote)) => Ok(serde_json::to_string_pretty(&merge_entries(&local, &remote))?),
        None => {
            tracing::warn!(path = %path.display(), "Cannot merge non-entry halves, keeping local");
            Ok(sides.local)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DevlogType, NoteCategory};
    use chrono::Duration;
    use tempfile::TempDir;

    fn entry_json(title: &str, offset_secs: i64) -> (Entry, String) {
        let mut e = Entry::new(title, DevlogType::Task);
        e.id = Some(1.into());
        e.updated_at = e.created_at + Duration::seconds(offset_secs);
        let json = serde_json::to_string_pretty(&e).unwrap();
        (e, json)
    }

    fn wrap(local: &str, remote: &str) -> String {
        format!("<<<<<<< HEAD\n{}\n=======\n{}\n>>>>>>> origin/main\n", local, remote)
    }

    #[test]
    fn test_timestamp_wins_picks_newer_remote() {
        let (_, older) = entry_json("Local", 1);
        let (_, newer) = entry_json("Remote", 2);
        let resolver = ConflictResolver::new(ConflictStrategy::TimestampWins);
        let out = resolver
            .resolve_content(Path::new("1.json"), &wrap(&older, &newer))
            .unwrap()
            .unwrap();
        assert_eq!(out, format!("{}\n", newer));
    }

    #[test]
    fn test_timestamp_wins_picks_newer_local() {
        let (_, newer) = entry_json("Local", 5);
        let (_, older) = entry_json("Remote", 2);
        let resolver = ConflictResolver::new(ConflictStrategy::TimestampWins);
        let out = resolver
            .resolve_content(Path::new("1.json"), &wrap(&newer, &older))
            .unwrap()
            .unwrap();
        assert_eq!(out, format!("{}\n", newer));
    }

    #[test]
    fn test_side_strategies_ignore_timestamps() {
        let (_, older) = entry_json("Local", 1);
        let (_, newer) = entry_json("Remote", 2);
        let content = wrap(&older, &newer);

        let local = ConflictResolver::new(ConflictStrategy::LocalWins)
            .resolve_content(Path::new("1.json"), &content)
            .unwrap()
            .unwrap();
        assert_eq!(local, format!("{}\n", older));

        let remote = ConflictResolver::new(ConflictStrategy::RemoteWins)
            .resolve_content(Path::new("1.json"), &content)
            .unwrap()
            .unwrap();
        assert_eq!(remote, format!("{}\n", newer));
    }

    #[test]
    fn test_unparsable_halves_keep_local() {
        let content = wrap("{ not json", "{ also not json");
        let out = ConflictResolver::new(ConflictStrategy::TimestampWins)
            .resolve_content(Path::new("x.json"), &content)
            .unwrap()
            .unwrap();
        assert_eq!(out, "{ not json\n");
    }

    #[test]
    fn test_split_keeps_common_lines_and_drops_base() {
        let content = "{\n<<<<<<< HEAD\n  \"a\": 1\n||||||| base\n  \"a\": 0\n=======\n  \"a\": 2\n>>>>>>> theirs\n}\n";
        let sides = split_conflict(content).unwrap().unwrap();
        assert_eq!(sides.local, "{\n  \"a\": 1\n}\n");
        assert_eq!(sides.remote, "{\n  \"a\": 2\n}\n");
        assert_eq!(sides.regions, 1);
    }

    #[test]
    fn test_no_markers_is_none() {
        assert!(split_conflict("{}\n").unwrap().is_none());
        assert!(!has_conflict_markers("{}\n"));
    }

    #[test]
    fn test_unterminated_region_is_malformed() {
        let err = split_conflict("<<<<<<< HEAD\na\n=======\nb\n").unwrap_err();
        assert!(matches!(err, DevlogError::MalformedData(_)));
    }

    #[test]
    fn test_interactive_without_prompt_uses_timestamps() {
        let (_, older) = entry_json("Local", 1);
        let (_, newer) = entry_json("Remote", 2);
        let out = ConflictResolver::new(ConflictStrategy::Interactive)
            .resolve_content(Path::new("1.json"), &wrap(&older, &newer))
            .unwrap()
            .unwrap();
        assert_eq!(out, format!("{}\n", newer));
    }

    struct AlwaysMerge;

    impl ConflictPrompt for AlwaysMerge {
        fn choose(&self, _path: &Path, _local: &str, _remote: &str) -> ConflictChoice {
            ConflictChoice::Merge
        }
    }

    #[test]
    fn test_interactive_prompt_merge() {
        let (mut local, _) = entry_json("Local", 1);
        local.tags = vec!["a".into()];
        let (mut remote, _) = entry_json("Remote", 2);
        remote.tags = vec!["b".into()];
        let content = wrap(
            &serde_json::to_string_pretty(&local).unwrap(),
            &serde_json::to_string_pretty(&remote).unwrap(),
        );
        let out = ConflictResolver::new(ConflictStrategy::Interactive)
            .with_prompt(Arc::new(AlwaysMerge))
            .resolve_content(Path::new("1.json"), &content)
            .unwrap()
            .unwrap();
        let merged: Entry = serde_json::from_str(&out).unwrap();
        assert_eq!(merged.title, "Remote");
        assert_eq!(merged.tags, vec!["a", "b"]);
    }

    #[test]
    fn test_merge_entries_unions_and_takes_newer_scalars() {
        let (mut local, _) = entry_json("Local title", 10);
        local.push_note(NoteCategory::Progress, "local note", vec![]);
        local.tags = vec!["x".into(), "y".into()];
        local.files = vec!["a.rs".into()];

        let (mut remote, _) = entry_json("Remote title", 5);
        remote.push_note(NoteCategory::Issue, "remote note", vec![]);
        remote.notes[0].id = "note-remote".into();
        remote.notes[0].timestamp = remote.created_at - Duration::seconds(1);
        remote.notes.push(local.notes[0].clone());
        remote.tags = vec!["y".into(), "z".into()];
        remote.files = vec!["b.rs".into()];

        let merged = merge_entries(&local, &remote);
        assert_eq!(merged.title, "Local title");
        assert_eq!(merged.updated_at, local.updated_at);
        assert_eq!(merged.tags, vec!["x", "y", "z"]);
        assert_eq!(merged.files, vec!["a.rs", "b.rs"]);
        assert_eq!(merged.notes.len(), 2);
        assert_eq!(merged.notes[0].id, "note-remote");
    }

    #[tokio::test]
    async fn test_distinct_entries_in_one_conflict_are_separated() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("001-fix-bug.json");
        let (local, local_json) = entry_json("Fix bug", 1);
        let mut remote = local.clone();
        remote.created_at = local.created_at + Duration::seconds(30);
        remote.description = "someone else's bug".into();
        let remote_json = serde_json::to_string_pretty(&remote).unwrap();
        std::fs::write(&path, wrap(&local_json, &remote_json)).unwrap();

        let sibling = separate_distinct_entries(&path).await.unwrap().unwrap();
        assert_eq!(sibling, temp.path().join("001-fix-bug.remote.json"));
        let kept: Entry = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let moved: Entry = serde_json::from_str(&std::fs::read_to_string(&sibling).unwrap()).unwrap();
        assert_eq!(kept, local);
        assert_eq!(moved, remote);
    }

    #[tokio::test]
    async fn test_edits_of_one_entry_are_not_separated() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("001-shared.json");
        let (local, local_json) = entry_json("Shared", 1);
        let mut remote = local.clone();
        remote.title = "Shared, renamed".into();
        let content = wrap(&local_json, &serde_json::to_string_pretty(&remote).unwrap());
        std::fs::write(&path, &content).unwrap();

        assert!(separate_distinct_entries(&path).await.unwrap().is_none());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), content);
    }

    #[tokio::test]
    async fn test_resolve_directory_rewrites_conflicted_files() {
        let temp = TempDir::new().unwrap();
        let entries = temp.path().join("entries");
        std::fs::create_dir_all(&entries).unwrap();
        let (_, older) = entry_json("Local", 1);
        let (_, newer) = entry_json("Remote", 2);
        std::fs::write(entries.join("001-a.json"), wrap(&older, &newer)).unwrap();
        std::fs::write(entries.join("002-b.json"), &older).unwrap();

        let resolver = ConflictResolver::new(ConflictStrategy::TimestampWins);
        let resolved = resolver.resolve_directory(temp.path()).await.unwrap();
        assert_eq!(resolved, vec![entries.join("001-a.json")]);
        let content = std::fs::read_to_string(entries.join("001-a.json")).unwrap();
        assert!(!has_conflict_markers(&content));
        assert_eq!(content, format!("{}\n", newer));
    }
}
