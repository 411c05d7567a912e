//! Domain types for devlog
//!
//! - Entry: the persisted record with notes, context and AI context
//! - DevlogFilter / DevlogStats: list predicates and aggregate counts
//! - Request types: create payloads and partial patches

pub mod entry;
pub mod filter;
pub mod request;

pub use entry::{
    AiContext, Decision, Dependency, DependencyType, DevlogContext, DevlogType, Entry, EntryId, ExternalReference,
    ExternalSystem, Note, NoteCategory, Priority, Risk, Status, normalize_title, slugify,
};
pub use filter::{DevlogFilter, DevlogStats, matches_text, sort_by_updated_desc};
pub use request::{AiContextUpdate, CreateDevlogRequest, UpdateDevlogRequest};
