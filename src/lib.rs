//! devlog - development log tracking with pluggable storage
//!
//! Entries persist interchangeably to a local JSON tree, SQLite or a SQL
//! server, a git repository used as a shared document store, or GitHub
//! Issues. `DevlogManager` drives the entry lifecycle over any
//! `StorageProvider`.

pub mod config;
pub mod domain;
pub mod error;
pub mod git;
pub mod github;
pub mod id;
pub mod manager;
pub mod storage;

pub use error::{DevlogError, Result};
pub use manager::{AiBriefing, DevlogManager};
pub use storage::{ProviderFactory, StorageConfig, StorageProvider};
