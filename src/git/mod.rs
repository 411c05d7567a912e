//! Git-backed storage
//!
//! Entries live as JSON files in a dedicated repository. Every git call goes
//! through `GitCommandRunner`, so the repository wrapper, structure manager
//! and conflict resolver can run against a scripted mock.

pub mod conflict;
pub mod provider;
pub mod repo;
pub mod runner;
pub mod structure;

pub use conflict::{
    ConflictChoice, ConflictPrompt, ConflictResolver, ConflictSides, ConflictStrategy, has_conflict_markers,
    merge_entries, separate_distinct_entries, split_conflict,
};
pub use provider::{GitStorageProvider, RemoteStatus, SyncReport, default_clone_dir};
pub use repo::{GitRepository, PullOutcome, redact};
pub use runner::{GitCommandRunner, GitOutput, MockGitRunner, ProcessGitRunner};
pub use structure::RepositoryStructure;
