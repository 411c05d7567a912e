//! In-process stand-in for the GitHub issues API.
//!
//! Keeps issues and labels in memory and understands the subset of the
//! search syntax the provider emits. Used by tests and for offline runs.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::api::{GitHubApi, Issue, IssueDraft, IssueState, Label, LabelOutcome, LabelSpec, RepositoryInfo};
use crate::error::{DevlogError, Result};

#[derive(Default)]
struct State {
    issues: BTreeMap<u64, Issue>,
    labels: BTreeMap<String, LabelSpec>,
    next_number: u64,
    calls: Vec<String>,
    failures: VecDeque<DevlogError>,
}

pub struct InMemoryGitHub {
    owner: String,
    repo: String,
    has_issues: bool,
    state: Mutex<State>,
}

impl InMemoryGitHub {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            has_issues: true,
            state: Mutex::new(State::default()),
        }
    }

    /// Repository reports issues as disabled.
    pub fn without_issues(mut self) -> Self {
        self.has_issues = false;
        self
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Fail the next API call with `err`. Queued failures are consumed in order.
    pub fn fail_next(&self, err: DevlogError) {
        self.with_state(|s| s.failures.push_back(err));
    }

    /// Names of the API methods called so far.
    pub fn calls(&self) -> Vec<String> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.with_state(|s| s.calls.iter().filter(|c| *c == method).count())
    }

    pub fn issue(&self, number: u64) -> Option<Issue> {
        self.with_state(|s| s.issues.get(&number).cloned())
    }

    pub fn label_names(&self) -> Vec<String> {
        self.with_state(|s| s.labels.keys().cloned().collect())
    }

    /// Insert an issue as if created outside devlog, returning its number.
    pub fn insert_issue(&self, mut issue: Issue) -> u64 {
        self.with_state(|s| {
            s.next_number += 1;
            issue.number = s.next_number;
            s.issues.insert(issue.number, issue);
            s.next_number
        })
    }

    fn begin(&self, method: &str) -> Result<()> {
        self.with_state(|s| {
            s.calls.push(method.to_string());
            match s.failures.pop_front() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }

    fn apply(issue: &mut Issue, draft: &IssueDraft) {
        issue.title = draft.title.clone();
        issue.body = Some(draft.body.clone());
        issue.labels = draft.labels.iter().map(|name| Label { name: name.clone() }).collect();
        if let Some(state) = draft.state {
            if state == IssueState::Closed && issue.state == IssueState::Open {
                issue.closed_at = Some(Utc::now());
            }
            if state == IssueState::Open {
                issue.closed_at = None;
            }
            issue.state = state;
        }
        issue.updated_at = Utc::now();
    }
}

/// Split a search string on whitespace, keeping double-quoted runs together.
fn tokenize(query: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in query.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[async_trait]
impl GitHubApi for InMemoryGitHub {
    async fn get_repository(&self) -> Result<RepositoryInfo> {
        self.begin("get_repository")?;
        Ok(RepositoryInfo {
            full_name: format!("{}/{}", self.owner, self.repo),
            has_issues: self.has_issues,
        })
    }

    async fn get_issue(&self, number: u64) -> Result<Option<Issue>> {
        self.begin("get_issue")?;
        Ok(self.issue(number))
    }

    async fn create_issue(&self, draft: &IssueDraft) -> Result<Issue> {
        self.begin("create_issue")?;
        Ok(self.with_state(|s| {
            s.next_number += 1;
            let now = Utc::now();
            let mut issue = Issue {
                number: s.next_number,
                title: String::new(),
                body: None,
                state: IssueState::Open,
                labels: Vec::new(),
                html_url: format!("https://github.com/{}/{}/issues/{}", self.owner, self.repo, s.next_number),
                created_at: now,
                updated_at: now,
                closed_at: None,
                pull_request: None,
            };
            Self::apply(&mut issue, draft);
            s.issues.insert(issue.number, issue.clone());
            issue
        }))
    }

    async fn update_issue(&self, number: u64, draft: &IssueDraft) -> Result<Issue> {
        self.begin("update_issue")?;
        self.with_state(|s| match s.issues.get_mut(&number) {
            Some(issue) => {
                Self::apply(issue, draft);
                Ok(issue.clone())
            }
            None => Err(DevlogError::GitHub {
                status: 404,
                message: "Not Found".to_string(),
            }),
        })
    }

    async fn list_issues(&self, labels: &[String], page: u32, per_page: u32) -> Result<Vec<Issue>> {
        self.begin("list_issues")?;
        let per_page = per_page.max(1) as usize;
        let skip = (page.max(1) as usize - 1) * per_page;
        Ok(self.with_state(|s| {
            s.issues
                .values()
                .rev()
                .filter(|i| labels.iter().all(|l| i.has_label(l)))
                .skip(skip)
                .take(per_page)
                .cloned()
                .collect()
        }))
    }

    async fn search_issues(&self, query: &str) -> Result<Vec<Issue>> {
        self.begin("search_issues")?;
        let mut required = Vec::new();
        let mut excluded = Vec::new();
        let mut words = Vec::new();
        let mut issues_only = false;
        for token in tokenize(query) {
            if let Some(label) = token.strip_prefix("-label:") {
                excluded.push(label.to_string());
            } else if let Some(label) = token.strip_prefix("label:") {
                required.push(label.to_string());
            } else if token == "is:issue" {
                issues_only = true;
            } else if token.starts_with("repo:") || token.starts_with("in:") {
                continue;
            } else {
                words.push(token.to_lowercase());
            }
        }
        Ok(self.with_state(|s| {
            s.issues
                .values()
                .filter(|i| !(issues_only && i.is_pull_request()))
                .filter(|i| required.iter().all(|l| i.has_label(l)))
                .filter(|i| !excluded.iter().any(|l| i.has_label(l)))
                .filter(|i| {
                    let text = format!("{} {}", i.title, i.body.as_deref().unwrap_or("")).to_lowercase();
                    words.iter().all(|w| text.contains(w.as_str()))
                })
                .cloned()
                .collect()
        }))
    }

    async fn create_label(&self, label: &LabelSpec) -> Result<LabelOutcome> {
        self.begin("create_label")?;
        Ok(self.with_state(|s| {
            if s.labels.contains_key(&label.name) {
                LabelOutcome::AlreadyExists
            } else {
                s.labels.insert(label.name.clone(), label.clone());
                LabelOutcome::Created
            }
        }))
    }
}
