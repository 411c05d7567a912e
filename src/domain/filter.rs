//! List filters, text matching and aggregate stats over entries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::{DevlogType, Entry, Priority, Status};

/// Optional predicates for `list`. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DevlogFilter {
    pub status: Vec<Status>,
    #[serde(rename = "type")]
    pub devlog_type: Vec<DevlogType>,
    pub priority: Vec<Priority>,
    pub assignee: Option<String>,
    /// Matches entries carrying any of these tags.
    pub tags: Vec<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
}

impl DevlogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status.push(status);
        self
    }

    pub fn with_type(mut self, devlog_type: DevlogType) -> Self {
        self.devlog_type.push(devlog_type);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority.push(priority);
        self
    }

    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from_date = from;
        self.to_date = to;
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Predicates answerable from an index summary alone.
    pub fn matches_summary(&self, status: Status, devlog_type: DevlogType, priority: Priority) -> bool {
        (self.status.is_empty() || self.status.contains(&status))
            && (self.devlog_type.is_empty() || self.devlog_type.contains(&devlog_type))
            && (self.priority.is_empty() || self.priority.contains(&priority))
    }

    /// Full predicate over a loaded entry. Date range applies to `createdAt`.
    pub fn matches(&self, entry: &Entry) -> bool {
        if !self.matches_summary(entry.status, entry.devlog_type, entry.priority) {
            return false;
        }
        if let Some(assignee) = &self.assignee {
            if entry.assignee.as_deref() != Some(assignee.as_str()) {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| entry.tags.contains(t)) {
            return false;
        }
        if let Some(from) = self.from_date {
            if entry.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.to_date {
            if entry.created_at > to {
                return false;
            }
        }
        true
    }
}

/// Case-insensitive substring match over the entry's text fields.
pub fn matches_text(entry: &Entry, query: &str) -> bool {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    let haystacks = [
        entry.title.as_str(),
        entry.description.as_str(),
        entry.context.business_context.as_str(),
        entry.context.technical_context.as_str(),
    ];
    haystacks.iter().any(|h| h.to_lowercase().contains(&needle))
        || entry.notes.iter().any(|n| n.content.to_lowercase().contains(&needle))
        || entry.tags.iter().any(|t| t.to_lowercase().contains(&needle))
}

/// Newest first; ties broken by id so output is stable.
pub fn sort_by_updated_desc(entries: &mut [Entry]) {
    entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| b.id.cmp(&a.id)));
}

/// Aggregate counts returned by `getStats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevlogStats {
    pub total_entries: usize,
    pub by_status: BTreeMap<Status, usize>,
    pub by_type: BTreeMap<DevlogType, usize>,
    pub by_priority: BTreeMap<Priority, usize>,
}

impl DevlogStats {
    pub fn record(&mut self, status: Status, devlog_type: DevlogType, priority: Priority) {
        self.total_entries += 1;
        *self.by_status.entry(status).or_default() += 1;
        *self.by_type.entry(devlog_type).or_default() += 1;
        *self.by_priority.entry(priority).or_default() += 1;
    }

    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> Self {
        let mut stats = Self::default();
        for entry in entries {
            stats.record(entry.status, entry.devlog_type, entry.priority);
        }
        stats
    }
}
