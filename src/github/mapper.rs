//! Entry <-> Issue encoding.
//!
//! The issue body carries readable Markdown sections followed by a fenced
//! JSON block between HTML comment markers. On decode the JSON block wins
//! over the prose for every field it carries; type, priority and status
//! live in labels.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::api::{Issue, IssueDraft, IssueState, LabelSpec};
use crate::domain::{
    AiContext, DevlogContext, DevlogType, Entry, EntryId, ExternalReference, Note, Priority, Status, slugify,
};
use crate::error::{DevlogError, Result};

pub const METADATA_START: &str = "<!-- DEVLOG_METADATA_START -->";
pub const DATA_MARKER: &str = "<!-- DEVLOG_DATA -->";
pub const METADATA_END: &str = "<!-- DEVLOG_METADATA_END -->";

const METADATA_VERSION: u32 = 1;

const DESCRIPTION: &str = "Description";
const BUSINESS: &str = "Business Context";
const TECHNICAL: &str = "Technical Context";
const ACCEPTANCE: &str = "Acceptance Criteria";
const SECTIONS: &[&str] = &[DESCRIPTION, BUSINESS, TECHNICAL, ACCEPTANCE];

/// Machine-readable block embedded in the issue body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DevlogMetadata {
    version: u32,
    key: Option<String>,
    /// Verbatim; the rendered prose is trimmed and split at headings.
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    estimated_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    actual_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assignee: Option<String>,
    tags: Vec<String>,
    files: Vec<String>,
    related_devlogs: Vec<String>,
    notes: Vec<Note>,
    context: Option<DevlogContext>,
    ai_context: Option<AiContext>,
    external_references: Vec<ExternalReference>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

/// Prose fields recovered from the Markdown sections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BodySections {
    pub description: String,
    pub business_context: String,
    pub technical_context: String,
    pub acceptance_criteria: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct IssueMapper {
    prefix: String,
}

impl IssueMapper {
    pub fn new(label_prefix: impl Into<String>) -> Self {
        Self {
            prefix: label_prefix.into(),
        }
    }

    pub fn type_label(&self, devlog_type: DevlogType) -> String {
        format!("{}-type:{}", self.prefix, devlog_type)
    }

    pub fn priority_label(&self, priority: Priority) -> String {
        format!("{}-priority:{}", self.prefix, priority)
    }

    pub fn status_label(&self, status: Status) -> String {
        format!("{}-status:{}", self.prefix, status)
    }

    pub fn deleted_label(&self) -> String {
        format!("{}-deleted", self.prefix)
    }

    /// Prefix shared by every type label; marks an issue as a devlog entry.
    pub fn type_label_prefix(&self) -> String {
        format!("{}-type:", self.prefix)
    }

    pub fn is_devlog_issue(&self, issue: &Issue) -> bool {
        let marker = self.type_label_prefix();
        !issue.is_pull_request() && issue.labels.iter().any(|l| l.name.starts_with(&marker))
    }

    pub fn is_deleted(&self, issue: &Issue) -> bool {
        issue.has_label(&self.deleted_label())
    }

    pub fn labels_for(&self, entry: &Entry) -> Vec<String> {
        vec![
            self.type_label(entry.devlog_type),
            self.priority_label(entry.priority),
            self.status_label(entry.status),
        ]
    }

    /// Every label the provider may apply.
    pub fn label_specs(&self) -> Vec<LabelSpec> {
        let mut specs = Vec::new();
        for t in DevlogType::ALL {
            specs.push(LabelSpec {
                name: self.type_label(*t),
                color: "1d76db".to_string(),
                description: format!("Devlog type: {}", t),
            });
        }
        for p in Priority::ALL {
            let color = match p {
                Priority::Critical => "b60205",
                Priority::High => "d93f0b",
                Priority::Medium => "fbca04",
                Priority::Low => "0e8a16",
            };
            specs.push(LabelSpec {
                name: self.priority_label(*p),
                color: color.to_string(),
                description: format!("Devlog priority: {}", p),
            });
        }
        for s in Status::ALL {
            specs.push(LabelSpec {
                name: self.status_label(*s),
                color: "c5def5".to_string(),
                description: format!("Devlog status: {}", s),
            });
        }
        specs.push(LabelSpec {
            name: self.deleted_label(),
            color: "000000".to_string(),
            description: "Soft-deleted devlog entry".to_string(),
        });
        specs
    }

    pub fn to_draft(&self, entry: &Entry) -> Result<IssueDraft> {
        let state = if entry.status.is_terminal() {
            IssueState::Closed
        } else {
            IssueState::Open
        };
        Ok(IssueDraft {
            title: entry.title.clone(),
            body: render_body(entry)?,
            labels: self.labels_for(entry),
            state: Some(state),
        })
    }

    /// Rebuild an entry from an issue. Labels give type, priority and
    /// status (falling back to the issue state); the JSON block overrides
    /// the Markdown prose.
    pub fn from_issue(&self, issue: &Issue) -> Result<Entry> {
        let body = issue.body.as_deref().unwrap_or("");
        let sections = parse_sections(body);
        let metadata = parse_metadata(body)?.unwrap_or_default();

        let devlog_type = self.label_value(issue, "type").unwrap_or_default();
        let priority = self.label_value(issue, "priority").unwrap_or_default();
        let status = self.label_value(issue, "status").unwrap_or(match issue.state {
            IssueState::Closed => Status::Done,
            IssueState::Open => Status::New,
        });

        let context = metadata.context.unwrap_or_else(|| DevlogContext {
            business_context: sections.business_context.clone(),
            technical_context: sections.technical_context.clone(),
            acceptance_criteria: sections.acceptance_criteria.clone(),
            ..DevlogContext::default()
        });
        let created_at = metadata.created_at.unwrap_or(issue.created_at);
        let ai_context = metadata.ai_context.unwrap_or_else(|| AiContext {
            last_ai_update: created_at,
            ..AiContext::default()
        });

        Ok(Entry {
            id: Some(EntryId::Number(issue.number)),
            key: metadata.key.unwrap_or_else(|| slugify(&issue.title)),
            title: issue.title.clone(),
            devlog_type,
            description: metadata.description.unwrap_or(sections.description),
            status,
            priority,
            created_at,
            updated_at: metadata.updated_at.unwrap_or(issue.updated_at),
            estimated_hours: metadata.estimated_hours,
            actual_hours: metadata.actual_hours,
            assignee: metadata.assignee,
            tags: metadata.tags,
            notes: metadata.notes,
            files: metadata.files,
            related_devlogs: metadata.related_devlogs,
            context,
            ai_context,
            external_references: metadata.external_references,
        })
    }

    fn label_value<T: FromStr>(&self, issue: &Issue, field: &str) -> Option<T> {
        let prefix = format!("{}-{}:", self.prefix, field);
        issue
            .labels
            .iter()
            .find_map(|l| l.name.strip_prefix(&prefix))
            .and_then(|v| v.parse().ok())
    }
}

/// Markdown sections followed by the delimited JSON block.
pub fn render_body(entry: &Entry) -> Result<String> {
    let mut body = String::new();
    let mut section = |heading: &str, text: &str| {
        if !text.trim().is_empty() {
            body.push_str(&format!("## {}\n\n{}\n\n", heading, text.trim()));
        }
    };
    section(DESCRIPTION, &entry.description);
    section(BUSINESS, &entry.context.business_context);
    section(TECHNICAL, &entry.context.technical_context);
    let checklist: Vec<String> = entry
        .context
        .acceptance_criteria
        .iter()
        .map(|c| format!("- [ ] {}", c))
        .collect();
    section(ACCEPTANCE, &checklist.join("\n"));

    let metadata = DevlogMetadata {
        version: METADATA_VERSION,
        key: Some(entry.key.clone()),
        description: Some(entry.description.clone()),
        estimated_hours: entry.estimated_hours,
        actual_hours: entry.actual_hours,
        assignee: entry.assignee.clone(),
        tags: entry.tags.clone(),
        files: entry.files.clone(),
        related_devlogs: entry.related_devlogs.clone(),
        notes: entry.notes.clone(),
        context: Some(entry.context.clone()),
        ai_context: Some(entry.ai_context.clone()),
        external_references: entry.external_references.clone(),
        created_at: Some(entry.created_at),
        updated_at: Some(entry.updated_at),
    };
    body.push_str(METADATA_START);
    body.push('\n');
    body.push_str(DATA_MARKER);
    body.push_str("\n```json\n");
    body.push_str(&serde_json::to_string_pretty(&metadata)?);
    body.push_str("\n```\n");
    body.push_str(METADATA_END);
    body.push('\n');
    Ok(body)
}

/// Best-effort parse of the known `## ` sections. Unknown headings stay in
/// the section above them; parsing stops at the metadata block.
pub fn parse_sections(body: &str) -> BodySections {
    let mut sections = BodySections::default();
    let mut current: Option<&str> = None;
    let mut buffer: Vec<&str> = Vec::new();

    fn flush(name: Option<&str>, lines: &mut Vec<&str>, out: &mut BodySections) {
        let text = lines.join("\n").trim().to_string();
        lines.clear();
        match name {
            Some(DESCRIPTION) => out.description = text,
            Some(BUSINESS) => out.business_context = text,
            Some(TECHNICAL) => out.technical_context = text,
            Some(ACCEPTANCE) => {
                out.acceptance_criteria = text
                    .lines()
                    .filter_map(|l| {
                        let l = l.trim();
                        l.strip_prefix("- [ ] ")
                            .or_else(|| l.strip_prefix("- [x] "))
                            .or_else(|| l.strip_prefix("- [X] "))
                            .or_else(|| l.strip_prefix("- "))
                    })
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect()
            }
            _ => {}
        }
    }

    for line in body.lines() {
        if line.trim() == METADATA_START {
            break;
        }
        let heading = line
            .strip_prefix("## ")
            .map(str::trim)
            .and_then(|h| SECTIONS.iter().copied().find(|s| *s == h));
        match heading {
            Some(name) => {
                flush(current, &mut buffer, &mut sections);
                current = Some(name);
            }
            None => buffer.push(line),
        }
    }
    flush(current, &mut buffer, &mut sections);
    sections
}

/// Extract the JSON block: the last data marker followed by a JSON fence.
/// `None` when the body has no marker; an error when the block is present
/// but unparsable.
fn parse_metadata(body: &str) -> Result<Option<DevlogMetadata>> {
    const FENCE: &str = "```json";
    let fenced = body
        .rmatch_indices(DATA_MARKER)
        .map(|(i, _)| body[i + DATA_MARKER.len()..].trim_start())
        .find(|rest| rest.starts_with(FENCE));
    let Some(fenced) = fenced else {
        if body.contains(DATA_MARKER) {
            return Err(DevlogError::MalformedData("metadata block without JSON fence".to_string()));
        }
        return Ok(None);
    };
    let json_start = &fenced[FENCE.len()..];
    let Some(close) = json_start.find("\n```") else {
        return Err(DevlogError::MalformedData("unterminated metadata JSON fence".to_string()));
    };
    let metadata = serde_json::from_str(json_start[..close].trim())
        .map_err(|e| DevlogError::MalformedData(format!("bad metadata JSON: {}", e)))?;
    Ok(Some(metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Decision, ExternalSystem, NoteCategory};
    use crate::github::api::Label;

    fn issue_from(draft: &IssueDraft, number: u64, entry: &Entry) -> Issue {
        Issue {
            number,
            title: draft.title.clone(),
            body: Some(draft.body.clone()),
            state: draft.state.unwrap_or(IssueState::Open),
            labels: draft.labels.iter().map(|n| Label { name: n.clone() }).collect(),
            html_url: format!("https://github.com/acme/tracker/issues/{}", number),
            created_at: entry.created_at,
            updated_at: entry.updated_at,
            closed_at: None,
            pull_request: None,
        }
    }

    fn rich_entry() -> Entry {
        let mut e = Entry::new("Add OAuth login", DevlogType::Feature);
        e.id = Some(EntryId::Number(7));
        e.description = "Users sign in with GitHub.\n\n## Not a section\nstill description".into();
        e.priority = Priority::High;
        e.status = Status::InProgress;
        e.estimated_hours = Some(6.0);
        e.assignee = Some("alice".into());
        e.tags = vec!["auth".into()];
        e.files = vec!["src/login.rs".into()];
        e.related_devlogs = vec!["3".into()];
        e.context.business_context = "Reduce signup friction".into();
        e.context.technical_context = "OAuth device flow".into();
        e.context.acceptance_criteria = vec!["Login works".into(), "Logout works".into()];
        e.context.decisions.push(Decision {
            id: "d1".into(),
            timestamp: e.created_at,
            decision: "Use device flow".into(),
            rationale: "CLI friendly".into(),
            alternatives: vec!["PKCE".into()],
            decision_maker: "alice".into(),
        });
        e.push_note(NoteCategory::Progress, "Scaffolded handler", vec![]);
        e.ai_context.current_summary = "Half done".into();
        e.set_external_reference(ExternalReference {
            system: ExternalSystem::Jira,
            id: "AUTH-1".into(),
            url: None,
            title: None,
            status: None,
            last_sync: None,
        });
        e
    }

    #[test]
    fn test_round_trip_preserves_entry() {
        let mapper = IssueMapper::new("devlog");
        let entry = rich_entry();
        let draft = mapper.to_draft(&entry).unwrap();
        assert_eq!(draft.state, Some(IssueState::Open));
        assert!(draft.labels.contains(&"devlog-type:feature".to_string()));
        assert!(draft.labels.contains(&"devlog-priority:high".to_string()));
        assert!(draft.labels.contains(&"devlog-status:in-progress".to_string()));

        let issue = issue_from(&draft, 7, &entry);
        let decoded = mapper.from_issue(&issue).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_body_layout() {
        let body = render_body(&rich_entry()).unwrap();
        assert!(body.starts_with("## Description\n\n"));
        assert!(body.contains("## Acceptance Criteria\n\n- [ ] Login works\n- [ ] Logout works"));
        let start = body.find(METADATA_START).unwrap();
        let data = body.find(DATA_MARKER).unwrap();
        let end = body.find(METADATA_END).unwrap();
        assert!(start < data && data < end);
        assert!(body.contains("```json\n{"));
    }

    #[test]
    fn test_closed_issue_without_status_label_is_done() {
        let mapper = IssueMapper::new("devlog");
        let mut entry = rich_entry();
        entry.status = Status::Done;
        let mut draft = mapper.to_draft(&entry).unwrap();
        assert_eq!(draft.state, Some(IssueState::Closed));
        draft.labels.retain(|l| !l.starts_with("devlog-status:"));
        let decoded = mapper.from_issue(&issue_from(&draft, 7, &entry)).unwrap();
        assert_eq!(decoded.status, Status::Done);
    }

    #[test]
    fn test_plain_issue_decodes_from_prose() {
        let mapper = IssueMapper::new("devlog");
        let body = "## Description\n\nFix the crash\n\n## Technical Context\n\nNull deref\n\n## Acceptance Criteria\n\n- [x] No crash\n- [ ] Test added\n";
        let issue = Issue {
            number: 4,
            title: "Crash on start".into(),
            body: Some(body.into()),
            state: IssueState::Open,
            labels: vec![Label {
                name: "devlog-type:bugfix".into(),
            }],
            html_url: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            closed_at: None,
            pull_request: None,
        };
        let entry = mapper.from_issue(&issue).unwrap();
        assert_eq!(entry.devlog_type, DevlogType::Bugfix);
        assert_eq!(entry.status, Status::New);
        assert_eq!(entry.priority, Priority::Medium);
        assert_eq!(entry.description, "Fix the crash");
        assert_eq!(entry.context.technical_context, "Null deref");
        assert_eq!(entry.context.acceptance_criteria, vec!["No crash", "Test added"]);
        assert_eq!(entry.key, "crash-on-start");
    }

    #[test]
    fn test_json_block_overrides_prose() {
        let mapper = IssueMapper::new("devlog");
        let entry = rich_entry();
        let draft = mapper.to_draft(&entry).unwrap();
        let mut issue = issue_from(&draft, 7, &entry);
        issue.body = Some(draft.body.replacen("Reduce signup friction", "Edited in the GitHub UI", 1));
        assert!(issue.body.as_deref().unwrap().contains("## Business Context\n\nEdited in the GitHub UI"));

        let decoded = mapper.from_issue(&issue).unwrap();
        assert_eq!(decoded.context.business_context, "Reduce signup friction");
    }

    #[test]
    fn test_description_survives_verbatim() {
        let mapper = IssueMapper::new("devlog");
        let mut entry = rich_entry();
        entry.description = format!(
            "  indented\n## Technical Context\nnot context\n{}\n",
            DATA_MARKER
        );
        let draft = mapper.to_draft(&entry).unwrap();
        let decoded = mapper.from_issue(&issue_from(&draft, 7, &entry)).unwrap();
        assert_eq!(decoded.description, entry.description);
        assert_eq!(decoded.context.technical_context, "OAuth device flow");
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_hand_written_block_without_description_uses_prose() {
        let mapper = IssueMapper::new("devlog");
        let entry = rich_entry();
        let draft = mapper.to_draft(&entry).unwrap();
        let mut issue = issue_from(&draft, 7, &entry);
        let body = issue.body.take().unwrap();
        let quoted = serde_json::to_string(&entry.description).unwrap();
        issue.body = Some(body.replacen(&format!("\"description\": {},", quoted), "", 1));

        let decoded = mapper.from_issue(&issue).unwrap();
        assert_eq!(decoded.description, "Users sign in with GitHub.\n\n## Not a section\nstill description");
    }

    #[test]
    fn test_unterminated_fence_is_malformed() {
        let body = format!("{}\n{}\n```json\n{{\"version\": 1}}\n", METADATA_START, DATA_MARKER);
        assert!(matches!(parse_metadata(&body), Err(DevlogError::MalformedData(_))));
    }

    #[test]
    fn test_label_specs_cover_all_values() {
        let specs = IssueMapper::new("dl").label_specs();
        let expected = DevlogType::ALL.len() + Priority::ALL.len() + Status::ALL.len() + 1;
        assert_eq!(specs.len(), expected);
        assert!(specs.iter().any(|s| s.name == "dl-deleted"));
    }
}
