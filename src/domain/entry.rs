//! The devlog entry record and its nested parts.
//!
//! An `Entry` is always persisted whole: callers reload, patch and save it
//! back. JSON field names are camelCase so files written by any provider
//! share one shape.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DevlogError, Result};
use crate::id::now;

/// Identifier of an entry within one backend.
///
/// Local, SQL, git and GitHub providers all produce `Number`. `Opaque`
/// carries legacy hash-slug identifiers and is rejected by integer backends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryId {
    Number(u64),
    Opaque(String),
}

impl EntryId {
    pub fn as_number(&self) -> Option<u64> {
        match self {
            EntryId::Number(n) => Some(*n),
            EntryId::Opaque(_) => None,
        }
    }

    /// The integer value, or `InvalidId` for opaque ids.
    pub fn require_number(&self) -> Result<u64> {
        self.as_number()
            .ok_or_else(|| DevlogError::InvalidId(format!("'{}' is not an integer id", self)))
    }
}

impl From<u64> for EntryId {
    fn from(value: u64) -> Self {
        EntryId::Number(value)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryId::Number(n) => write!(f, "{}", n),
            EntryId::Opaque(s) => write!(f, "{}", s),
        }
    }
}

impl FromStr for EntryId {
    type Err = DevlogError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DevlogError::InvalidId("empty id".to_string()));
        }
        match crate::id::parse_display(trimmed) {
            Ok(n) => Ok(EntryId::Number(n)),
            Err(_) => Ok(EntryId::Opaque(trimmed.to_string())),
        }
    }
}

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = DevlogError;

            fn from_str(s: &str) -> Result<Self> {
                let wanted = s.trim().to_lowercase();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == wanted)
                    .or_else(|| serde_json::from_value(serde_json::Value::String(wanted.clone())).ok())
                    .ok_or_else(|| DevlogError::MalformedData(format!(
                        "unknown {} '{}'", stringify!($name), s
                    )))
            }
        }
    };
}

/// Kind of work an entry tracks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevlogType {
    #[default]
    Feature,
    Bugfix,
    Task,
    Refactor,
    Docs,
}

string_enum!(DevlogType {
    Feature => "feature",
    Bugfix => "bugfix",
    Task => "task",
    Refactor => "refactor",
    Docs => "docs",
});

/// Workflow status, declared in workflow order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    #[default]
    #[serde(alias = "todo")]
    New,
    InProgress,
    Blocked,
    #[serde(alias = "review")]
    InReview,
    Testing,
    Done,
    Closed,
    Archived,
}

string_enum!(Status {
    New => "new",
    InProgress => "in-progress",
    Blocked => "blocked",
    InReview => "in-review",
    Testing => "testing",
    Done => "done",
    Closed => "closed",
    Archived => "archived",
});

impl Status {
    /// Work on the entry has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Done | Status::Closed | Status::Archived)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

string_enum!(Priority {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteCategory {
    #[default]
    Progress,
    Issue,
    Solution,
    Idea,
    Reminder,
    Feedback,
}

string_enum!(NoteCategory {
    Progress => "progress",
    Issue => "issue",
    Solution => "solution",
    Idea => "idea",
    Reminder => "reminder",
    Feedback => "feedback",
});

/// Timestamped, append-only note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub category: NoteCategory,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub decision: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub alternatives: Vec<String>,
    #[serde(default)]
    pub decision_maker: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyType {
    Blocks,
    BlockedBy,
    #[default]
    RelatedTo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub id: String,
    #[serde(rename = "type", default)]
    pub dependency_type: DependencyType,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Risk {
    pub description: String,
    #[serde(default)]
    pub impact: String,
    #[serde(default)]
    pub probability: String,
    #[serde(default)]
    pub mitigation: String,
}

/// Business and technical narrative of an entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DevlogContext {
    pub business_context: String,
    pub technical_context: String,
    pub dependencies: Vec<Dependency>,
    pub decisions: Vec<Decision>,
    pub acceptance_criteria: Vec<String>,
    pub risks: Vec<Risk>,
}

/// Persistent memory for AI agents working the entry across sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AiContext {
    pub current_summary: String,
    pub key_insights: Vec<String>,
    pub open_questions: Vec<String>,
    pub related_patterns: Vec<String>,
    pub suggested_next_steps: Vec<String>,
    #[serde(rename = "lastAIUpdate")]
    pub last_ai_update: DateTime<Utc>,
    pub context_version: u64,
}

impl Default for AiContext {
    fn default() -> Self {
        Self {
            current_summary: String::new(),
            key_insights: Vec::new(),
            open_questions: Vec::new(),
            related_patterns: Vec::new(),
            suggested_next_steps: Vec::new(),
            last_ai_update: DateTime::<Utc>::UNIX_EPOCH,
            context_version: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalSystem {
    Jira,
    Github,
    Ado,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalReference {
    pub system: ExternalSystem,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
}

/// A devlog entry: one feature, bug or task and everything learned about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntryId>,
    #[serde(default)]
    pub key: String,
    pub title: String,
    #[serde(rename = "type", default)]
    pub devlog_type: DevlogType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub related_devlogs: Vec<String>,
    #[serde(default)]
    pub context: DevlogContext,
    #[serde(default)]
    pub ai_context: AiContext,
    #[serde(default)]
    pub external_references: Vec<ExternalReference>,
}

impl Entry {
    /// Fresh unsaved entry; the provider assigns the id on save.
    pub fn new(title: impl Into<String>, devlog_type: DevlogType) -> Self {
        let title = title.into();
        let ts = now();
        Self {
            id: None,
            key: slugify(&title),
            title,
            devlog_type,
            description: String::new(),
            status: Status::New,
            priority: Priority::Medium,
            created_at: ts,
            updated_at: ts,
            estimated_hours: None,
            actual_hours: None,
            assignee: None,
            tags: Vec::new(),
            notes: Vec::new(),
            files: Vec::new(),
            related_devlogs: Vec::new(),
            context: DevlogContext::default(),
            ai_context: AiContext {
                last_ai_update: ts,
                ..AiContext::default()
            },
            external_references: Vec::new(),
        }
    }

    /// Bump `updated_at`, never moving it backwards.
    pub fn touch(&mut self) {
        self.updated_at = now().max(self.updated_at);
    }

    /// Append a note with a fresh id and timestamp, returning a copy.
    pub fn push_note(&mut self, category: NoteCategory, content: impl Into<String>, files: Vec<String>) -> Note {
        let timestamp = now();
        let note = Note {
            id: format!("note-{}-{}", timestamp.timestamp_millis(), self.notes.len() + 1),
            timestamp,
            category,
            content: content.into(),
            files,
        };
        self.notes.push(note.clone());
        note
    }

    /// Record a mutation of the AI context block.
    pub fn bump_ai_context(&mut self) {
        self.ai_context.context_version += 1;
        self.ai_context.last_ai_update = now();
    }

    /// Insert or replace the single reference held for `reference.system`.
    pub fn set_external_reference(&mut self, reference: ExternalReference) {
        match self
            .external_references
            .iter_mut()
            .find(|r| r.system == reference.system)
        {
            Some(existing) => *existing = reference,
            None => self.external_references.push(reference),
        }
    }

    /// Title as used for duplicate detection.
    pub fn normalized_title(&self) -> String {
        normalize_title(&self.title)
    }

    /// Display form of the id, `#12`, or `(unsaved)`.
    pub fn display_id(&self) -> String {
        match &self.id {
            Some(EntryId::Number(n)) => crate::id::format_for_display(*n),
            Some(EntryId::Opaque(s)) => s.clone(),
            None => "(unsaved)".to_string(),
        }
    }
}

/// Lowercase, collapse whitespace; used for case-insensitive title matching.
pub fn normalize_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// `"Add OAuth login!"` -> `"add-oauth-login"`
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}
