//! Entry lifecycle on top of any storage provider.
//!
//! Every mutation reloads the entry, patches it, bumps `updatedAt` and
//! saves it whole.

use std::sync::Arc;

use serde::Serialize;

use crate::domain::{
    AiContextUpdate, CreateDevlogRequest, Decision, Dependency, DependencyType, DevlogFilter, DevlogStats,
    DevlogType, Entry, EntryId, ExternalReference, Note, NoteCategory, Priority, Status, UpdateDevlogRequest,
    normalize_title,
};
use crate::error::{DevlogError, Result};
use crate::id::now;
use crate::storage::StorageProvider;

const RECENT_NOTES: usize = 5;

/// Compact view of an entry for handing to an assistant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiBriefing {
    pub id: Option<EntryId>,
    pub title: String,
    #[serde(rename = "type")]
    pub devlog_type: DevlogType,
    pub status: Status,
    pub priority: Priority,
    pub summary: String,
    pub key_insights: Vec<String>,
    pub open_questions: Vec<String>,
    pub suggested_next_steps: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub decisions: Vec<Decision>,
    pub recent_notes: Vec<Note>,
    pub context_version: u64,
}

pub struct DevlogManager {
    provider: Arc<dyn StorageProvider>,
}

impl DevlogManager {
    pub fn new(provider: Arc<dyn StorageProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<dyn StorageProvider> {
        &self.provider
    }

    pub async fn initialize(&self) -> Result<()> {
        self.provider.initialize().await
    }

    pub async fn dispose(&self) -> Result<()> {
        self.provider.dispose().await
    }

    async fn find_duplicate(&self, title: &str, devlog_type: DevlogType) -> Result<Option<Entry>> {
        let wanted = normalize_title(title);
        let candidates = self.provider.list(&DevlogFilter::new().with_type(devlog_type)).await?;
        Ok(candidates.into_iter().find(|e| e.normalized_title() == wanted))
    }

    /// Return the entry matching the request's id, or its title and type,
    /// creating it when neither exists. The flag is true when created.
    pub async fn find_or_create(&self, request: CreateDevlogRequest) -> Result<(Entry, bool)> {
        if let Some(id) = &request.id
            && let Some(existing) = self.provider.get(id).await?
        {
            return Ok((existing, false));
        }
        if let Some(existing) = self.find_duplicate(&request.title, request.devlog_type).await? {
            tracing::debug!(id = %existing.display_id(), title = %existing.title, "Found existing entry");
            return Ok((existing, false));
        }
        let saved = self.provider.save(request.into_entry()).await?;
        tracing::info!(id = %saved.display_id(), title = %saved.title, "Created entry");
        Ok((saved, true))
    }

    /// Create a new entry; a title+type collision is `Duplicate`.
    pub async fn create(&self, request: CreateDevlogRequest) -> Result<Entry> {
        if let Some(existing) = self.find_duplicate(&request.title, request.devlog_type).await? {
            return Err(DevlogError::Duplicate(format!(
                "{} '{}' already exists as {}",
                existing.devlog_type,
                existing.title,
                existing.display_id()
            )));
        }
        let saved = self.provider.save(request.into_entry()).await?;
        tracing::info!(id = %saved.display_id(), title = %saved.title, "Created entry");
        Ok(saved)
    }

    pub async fn get(&self, id: &EntryId) -> Result<Option<Entry>> {
        self.provider.get(id).await
    }

    async fn require(&self, id: &EntryId) -> Result<Entry> {
        self.provider
            .get(id)
            .await?
            .ok_or_else(|| DevlogError::NotFound(format!("devlog {}", id)))
    }

    async fn modify(&self, id: &EntryId, patch: impl FnOnce(&mut Entry)) -> Result<Entry> {
        let mut entry = self.require(id).await?;
        patch(&mut entry);
        entry.touch();
        self.provider.save(entry).await
    }

    pub async fn update(&self, id: &EntryId, request: UpdateDevlogRequest) -> Result<Entry> {
        self.modify(id, |entry| request.apply(entry)).await
    }

    pub async fn add_note(
        &self,
        id: &EntryId,
        category: NoteCategory,
        content: impl Into<String>,
        files: Vec<String>,
    ) -> Result<Entry> {
        let content = content.into();
        self.modify(id, |entry| {
            for file in &files {
                if !entry.files.contains(file) {
                    entry.files.push(file.clone());
                }
            }
            entry.push_note(category, content, files);
        })
        .await
    }

    pub async fn add_decision(
        &self,
        id: &EntryId,
        decision: impl Into<String>,
        rationale: impl Into<String>,
        alternatives: Vec<String>,
        decision_maker: impl Into<String>,
    ) -> Result<Entry> {
        let timestamp = now();
        let mut decision = Decision {
            id: String::new(),
            timestamp,
            decision: decision.into(),
            rationale: rationale.into(),
            alternatives,
            decision_maker: decision_maker.into(),
        };
        self.modify(id, |entry| {
            decision.id = format!(
                "decision-{}-{}",
                timestamp.timestamp_millis(),
                entry.context.decisions.len() + 1
            );
            entry.context.decisions.push(decision);
        })
        .await
    }

    pub async fn update_ai_context(&self, id: &EntryId, update: AiContextUpdate) -> Result<Entry> {
        self.modify(id, |entry| update.apply(entry)).await
    }

    pub async fn add_dependency(
        &self,
        id: &EntryId,
        dependency_type: DependencyType,
        description: impl Into<String>,
        external_id: Option<String>,
    ) -> Result<Entry> {
        let description = description.into();
        self.modify(id, |entry| {
            let dependency = Dependency {
                id: format!("dep-{}-{}", now().timestamp_millis(), entry.context.dependencies.len() + 1),
                dependency_type,
                description,
                external_id,
            };
            entry.context.dependencies.push(dependency);
        })
        .await
    }

    pub async fn set_external_reference(&self, id: &EntryId, reference: ExternalReference) -> Result<Entry> {
        self.modify(id, |entry| entry.set_external_reference(reference)).await
    }

    async fn transition(&self, id: &EntryId, status: Status, note: Option<String>) -> Result<Entry> {
        let entry = self
            .modify(id, |entry| {
                entry.status = status;
                if let Some(note) = note {
                    entry.push_note(NoteCategory::Progress, note, Vec::new());
                }
            })
            .await?;
        tracing::info!(id = %entry.display_id(), status = %status, "Status changed");
        Ok(entry)
    }

    /// Mark done, noting `Completed: <summary>` when a summary is given.
    pub async fn complete(&self, id: &EntryId, summary: Option<&str>) -> Result<Entry> {
        let note = summary.map(|s| format!("Completed: {}", s));
        self.transition(id, Status::Done, note).await
    }

    /// Mark closed, noting `Closed: <reason>` when a reason is given.
    pub async fn close(&self, id: &EntryId, reason: Option<&str>) -> Result<Entry> {
        let note = reason.map(|r| format!("Closed: {}", r));
        self.transition(id, Status::Closed, note).await
    }

    pub async fn archive(&self, id: &EntryId) -> Result<Entry> {
        self.transition(id, Status::Archived, None).await
    }

    /// Archived entries come back as `done`; others are returned unchanged.
    pub async fn unarchive(&self, id: &EntryId) -> Result<Entry> {
        let entry = self.require(id).await?;
        if entry.status != Status::Archived {
            return Ok(entry);
        }
        self.transition(id, Status::Done, None).await
    }

    pub async fn delete(&self, id: &EntryId) -> Result<()> {
        if !self.provider.exists(id).await? {
            return Err(DevlogError::NotFound(format!("devlog {}", id)));
        }
        self.provider.delete(id).await?;
        tracing::info!(id = %id, "Deleted entry");
        Ok(())
    }

    pub async fn list(&self, filter: &DevlogFilter) -> Result<Vec<Entry>> {
        self.provider.list(filter).await
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Entry>> {
        self.provider.search(query).await
    }

    pub async fn stats(&self) -> Result<DevlogStats> {
        self.provider.stats().await
    }

    /// Up to `limit` non-terminal entries, most recently updated first.
    pub async fn active_context(&self, limit: usize) -> Result<Vec<Entry>> {
        let entries = self.provider.list(&DevlogFilter::default()).await?;
        Ok(entries
            .into_iter()
            .filter(|e| !e.status.is_terminal())
            .take(limit)
            .collect())
    }

    pub async fn context_for_ai(&self, id: &EntryId) -> Result<AiBriefing> {
        let entry = self.require(id).await?;
        let skip = entry.notes.len().saturating_sub(RECENT_NOTES);
        Ok(AiBriefing {
            id: entry.id.clone(),
            title: entry.title,
            devlog_type: entry.devlog_type,
            status: entry.status,
            priority: entry.priority,
            summary: entry.ai_context.current_summary,
            key_insights: entry.ai_context.key_insights,
            open_questions: entry.ai_context.open_questions,
            suggested_next_steps: entry.ai_context.suggested_next_steps,
            acceptance_criteria: entry.context.acceptance_criteria,
            decisions: entry.context.decisions,
            recent_notes: entry.notes.into_iter().skip(skip).collect(),
            context_version: entry.ai_context.context_version,
        })
    }
}
