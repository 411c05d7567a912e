//! Inputs for creating and patching entries.

use serde::{Deserialize, Serialize};

use super::entry::{DevlogType, Entry, EntryId, Priority, Status};

/// Fields accepted when creating an entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateDevlogRequest {
    /// Candidate id; when it already exists the existing entry is returned.
    pub id: Option<EntryId>,
    pub title: String,
    #[serde(rename = "type")]
    pub devlog_type: DevlogType,
    pub description: String,
    pub priority: Option<Priority>,
    pub assignee: Option<String>,
    pub tags: Vec<String>,
    pub estimated_hours: Option<f64>,
    pub business_context: String,
    pub technical_context: String,
    pub acceptance_criteria: Vec<String>,
    pub initial_insights: Vec<String>,
    pub related_patterns: Vec<String>,
}

impl CreateDevlogRequest {
    pub fn new(title: impl Into<String>, devlog_type: DevlogType) -> Self {
        Self {
            title: title.into(),
            devlog_type,
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Build the unsaved entry this request describes.
    pub fn into_entry(self) -> Entry {
        let mut entry = Entry::new(self.title, self.devlog_type);
        entry.id = self.id;
        entry.description = self.description;
        entry.priority = self.priority.unwrap_or_default();
        entry.assignee = self.assignee;
        entry.tags = self.tags;
        entry.estimated_hours = self.estimated_hours;
        entry.context.business_context = self.business_context;
        entry.context.technical_context = self.technical_context;
        entry.context.acceptance_criteria = self.acceptance_criteria;
        entry.ai_context.key_insights = self.initial_insights;
        entry.ai_context.related_patterns = self.related_patterns;
        entry
    }
}

/// Partial patch; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateDevlogRequest {
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub devlog_type: Option<DevlogType>,
    pub description: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub assignee: Option<String>,
    pub tags: Option<Vec<String>>,
    pub files: Option<Vec<String>>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub business_context: Option<String>,
    pub technical_context: Option<String>,
    pub acceptance_criteria: Option<Vec<String>>,
}

impl UpdateDevlogRequest {
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Apply the patch. Does not touch timestamps.
    pub fn apply(self, entry: &mut Entry) {
        if let Some(title) = self.title {
            entry.key = super::entry::slugify(&title);
            entry.title = title;
        }
        if let Some(devlog_type) = self.devlog_type {
            entry.devlog_type = devlog_type;
        }
        if let Some(description) = self.description {
            entry.description = description;
        }
        if let Some(status) = self.status {
            entry.status = status;
        }
        if let Some(priority) = self.priority {
            entry.priority = priority;
        }
        if let Some(assignee) = self.assignee {
            entry.assignee = Some(assignee);
        }
        if let Some(tags) = self.tags {
            entry.tags = tags;
        }
        if let Some(files) = self.files {
            entry.files = files;
        }
        if let Some(hours) = self.estimated_hours {
            entry.estimated_hours = Some(hours);
        }
        if let Some(hours) = self.actual_hours {
            entry.actual_hours = Some(hours);
        }
        if let Some(business) = self.business_context {
            entry.context.business_context = business;
        }
        if let Some(technical) = self.technical_context {
            entry.context.technical_context = technical;
        }
        if let Some(criteria) = self.acceptance_criteria {
            entry.context.acceptance_criteria = criteria;
        }
    }
}

/// Patch for the AI context block. Lists replace the stored lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AiContextUpdate {
    pub summary: Option<String>,
    pub insights: Option<Vec<String>>,
    pub questions: Option<Vec<String>>,
    pub patterns: Option<Vec<String>>,
    pub next_steps: Option<Vec<String>>,
}

impl AiContextUpdate {
    /// Apply the patch and bump `contextVersion` by exactly one.
    pub fn apply(self, entry: &mut Entry) {
        let ai = &mut entry.ai_context;
        if let Some(summary) = self.summary {
            ai.current_summary = summary;
        }
        if let Some(insights) = self.insights {
            ai.key_insights = insights;
        }
        if let Some(questions) = self.questions {
            ai.open_questions = questions;
        }
        if let Some(patterns) = self.patterns {
            ai.related_patterns = patterns;
        }
        if let Some(next_steps) = self.next_steps {
            ai.suggested_next_steps = next_steps;
        }
        entry.bump_ai_context();
    }
}
