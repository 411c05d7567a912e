//! GitHub Issues storage backend
//!
//! - api: REST seam (`GitHubApi`) and the reqwest client
//! - mapper: entry <-> issue body and label encoding
//! - labels / rate_limit / cache: provisioning, request budget, issue cache
//! - memory: in-process API used by tests and offline runs

pub mod api;
pub mod cache;
pub mod labels;
pub mod mapper;
pub mod memory;
pub mod provider;
pub mod rate_limit;

pub use api::{GitHubApi, Issue, IssueDraft, IssueState, Label, LabelOutcome, LabelSpec, RepositoryInfo, RestGitHubApi};
pub use cache::IssueCache;
pub use labels::{LabelManager, LabelReport};
pub use mapper::{BodySections, DATA_MARKER, IssueMapper, METADATA_END, METADATA_START, parse_sections, render_body};
pub use memory::InMemoryGitHub;
pub use provider::GitHubStorageProvider;
pub use rate_limit::RateLimiter;
