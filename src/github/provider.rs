//! GitHub Issues backed storage.
//!
//! Issue numbers are the entry ids. Deletes are soft: the issue is closed
//! and tagged `<prefix>-deleted`, after which every read treats it as
//! absent. Saving an entry whose issue is missing, deleted or not a devlog
//! issue files a new one, so the returned entry can carry a different id
//! than the one passed in.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::api::{GitHubApi, Issue, IssueDraft, IssueState, RestGitHubApi};
use super::cache::IssueCache;
use super::labels::{LabelManager, LabelReport};
use super::mapper::IssueMapper;
use super::rate_limit::RateLimiter;
use crate::domain::{DevlogFilter, DevlogStats, Entry, EntryId, sort_by_updated_desc};
use crate::error::{DevlogError, Result};
use crate::storage::{GitHubStorageConfig, StorageProvider};

const PAGE_SIZE: u32 = 100;

pub struct GitHubStorageProvider {
    config: GitHubStorageConfig,
    api: Arc<dyn GitHubApi>,
    mapper: IssueMapper,
    limiter: RateLimiter,
    cache: IssueCache,
    labels: LabelManager,
    ready: AtomicBool,
}

impl GitHubStorageProvider {
    /// Provider talking to the REST API at `config.api_url`.
    pub fn new(config: GitHubStorageConfig) -> Result<Self> {
        let api = RestGitHubApi::new(&config.api_url, &config.owner, &config.repo, &config.token)?;
        Ok(Self::with_api(config, Arc::new(api)))
    }

    pub fn with_api(config: GitHubStorageConfig, api: Arc<dyn GitHubApi>) -> Self {
        let mapper = IssueMapper::new(&config.label_prefix);
        let labels = LabelManager::new(api.clone(), mapper.label_specs());
        Self {
            limiter: RateLimiter::new(&config.rate_limit),
            cache: IssueCache::new(&config.cache),
            api,
            mapper,
            labels,
            config,
            ready: AtomicBool::new(false),
        }
    }

    pub fn mapper(&self) -> &IssueMapper {
        &self.mapper
    }

    fn repo_slug(&self) -> String {
        format!("{}/{}", self.config.owner, self.config.repo)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.ready.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(DevlogError::NotInitialized(format!("github storage for {}", self.repo_slug())))
        }
    }

    /// Provision labels again; a no-op once done.
    pub async fn ensure_labels(&self) -> Result<LabelReport> {
        self.labels.ensure(&self.limiter).await
    }

    async fn fetch_issue(&self, number: u64) -> Result<Option<Issue>> {
        if let Some(issue) = self.cache.get(number) {
            return Ok(Some(issue));
        }
        let issue = self
            .limiter
            .execute("get_issue", || self.api.get_issue(number))
            .await?;
        if let Some(issue) = &issue {
            self.cache.put(issue.clone());
        }
        Ok(issue)
    }

    /// The issue behind `number` if it is a live devlog entry.
    async fn live_issue(&self, number: u64) -> Result<Option<Issue>> {
        Ok(self
            .fetch_issue(number)
            .await?
            .filter(|issue| self.mapper.is_devlog_issue(issue) && !self.mapper.is_deleted(issue)))
    }

    fn decode_all(&self, issues: Vec<Issue>) -> Vec<Entry> {
        issues
            .into_iter()
            .filter(|issue| self.mapper.is_devlog_issue(issue) && !self.mapper.is_deleted(issue))
            .filter_map(|issue| match self.mapper.from_issue(&issue) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(number = issue.number, error = %e, "Skipping undecodable issue");
                    None
                }
            })
            .collect()
    }

    async fn list_pages(&self, labels: &[String]) -> Result<Vec<Issue>> {
        let mut issues = Vec::new();
        let mut page = 1;
        loop {
            let batch = self
                .limiter
                .execute("list_issues", || self.api.list_issues(labels, page, PAGE_SIZE))
                .await?;
            let done = (batch.len() as u32) < PAGE_SIZE;
            issues.extend(batch);
            if done {
                break;
            }
            page += 1;
        }
        Ok(issues)
    }

    async fn write_issue(&self, number: Option<u64>, draft: &IssueDraft) -> Result<Issue> {
        let issue = match number {
            Some(n) => {
                self.cache.invalidate(n);
                self.limiter
                    .execute("update_issue", || self.api.update_issue(n, draft))
                    .await?
            }
            None => {
                self.limiter
                    .execute("create_issue", || self.api.create_issue(draft))
                    .await?
            }
        };
        self.cache.put(issue.clone());
        Ok(issue)
    }
}

#[async_trait]
impl StorageProvider for GitHubStorageProvider {
    fn kind(&self) -> &'static str {
        "github"
    }

    async fn initialize(&self) -> Result<()> {
        let info = self
            .limiter
            .execute("get_repository", || self.api.get_repository())
            .await?;
        if !info.has_issues {
            return Err(DevlogError::Config(format!(
                "issues are disabled for {}",
                info.full_name
            )));
        }
        self.ensure_labels().await?;
        self.ready.store(true, Ordering::Release);
        tracing::info!(
            repo = %info.full_name,
            prefix = %self.config.label_prefix,
            budget = self.limiter.remaining(),
            "GitHub storage initialized"
        );
        Ok(())
    }

    async fn get(&self, id: &EntryId) -> Result<Option<Entry>> {
        self.ensure_ready()?;
        let number = id.require_number()?;
        match self.live_issue(number).await? {
            Some(issue) => Ok(Some(self.mapper.from_issue(&issue)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, entry: Entry) -> Result<Entry> {
        self.ensure_ready()?;
        let number = match &entry.id {
            Some(id) => Some(id.require_number()?),
            None => None,
        };
        let existing = match number {
            Some(n) => self.live_issue(n).await?,
            None => None,
        };
        if number.is_some() && existing.is_none() {
            tracing::warn!(id = ?number, "No live devlog issue with that number, filing a new one");
        }

        let draft = self.mapper.to_draft(&entry)?;
        let issue = self.write_issue(existing.map(|i| i.number), &draft).await?;
        tracing::info!(number = issue.number, title = %issue.title, "Saved devlog issue");
        self.mapper.from_issue(&issue)
    }

    async fn delete(&self, id: &EntryId) -> Result<()> {
        self.ensure_ready()?;
        let number = id.require_number()?;
        let Some(issue) = self.live_issue(number).await? else {
            return Ok(());
        };
        let mut labels = issue.label_names();
        labels.push(self.mapper.deleted_label());
        let draft = IssueDraft {
            title: issue.title.clone(),
            body: issue.body.clone().unwrap_or_default(),
            labels,
            state: Some(IssueState::Closed),
        };
        self.write_issue(Some(number), &draft).await?;
        tracing::info!(number, "Soft-deleted devlog issue");
        Ok(())
    }

    /// Narrowed server-side by the type label when the filter names exactly
    /// one type; everything else is filtered locally.
    async fn list(&self, filter: &DevlogFilter) -> Result<Vec<Entry>> {
        self.ensure_ready()?;
        let labels = match filter.devlog_type.as_slice() {
            [only] => vec![self.mapper.type_label(*only)],
            _ => Vec::new(),
        };
        let issues = self.list_pages(&labels).await?;
        let mut entries: Vec<Entry> = self
            .decode_all(issues)
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        sort_by_updated_desc(&mut entries);
        Ok(entries)
    }

    /// GitHub issue search; results keep GitHub's relevance order.
    async fn search(&self, query: &str) -> Result<Vec<Entry>> {
        self.ensure_ready()?;
        let q = format!(
            "{} repo:{} is:issue -label:\"{}\"",
            query.trim(),
            self.repo_slug(),
            self.mapper.deleted_label()
        );
        let issues = self
            .limiter
            .execute("search_issues", || self.api.search_issues(&q))
            .await?;
        Ok(self.decode_all(issues))
    }

    async fn stats(&self) -> Result<DevlogStats> {
        let entries = self.list(&DevlogFilter::default()).await?;
        Ok(DevlogStats::from_entries(&entries))
    }

    async fn dispose(&self) -> Result<()> {
        self.cache.clear();
        self.ready.store(false, Ordering::Release);
        Ok(())
    }
}
