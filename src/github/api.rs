//! GitHub REST surface used by the issue provider, behind a trait so tests
//! can substitute an in-memory fake.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DevlogError, Result};

const API_VERSION: &str = "2022-11-28";
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: IssueState,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub html_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    /// Present when the "issue" is a pull request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<Value>,
}

impl Issue {
    pub fn label_names(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.name.clone()).collect()
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.name == name)
    }

    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

/// Body of a create or update call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IssueDraft {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<IssueState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSpec {
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RepositoryInfo {
    pub full_name: String,
    #[serde(default = "default_true")]
    pub has_issues: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<Issue>,
}

#[async_trait]
pub trait GitHubApi: Send + Sync {
    async fn get_repository(&self) -> Result<RepositoryInfo>;

    /// `None` for 404/410.
    async fn get_issue(&self, number: u64) -> Result<Option<Issue>>;

    async fn create_issue(&self, draft: &IssueDraft) -> Result<Issue>;

    async fn update_issue(&self, number: u64, draft: &IssueDraft) -> Result<Issue>;

    /// One page of issues (any state) carrying all of `labels`.
    async fn list_issues(&self, labels: &[String], page: u32, per_page: u32) -> Result<Vec<Issue>>;

    /// Issue search with a raw `q` string.
    async fn search_issues(&self, query: &str) -> Result<Vec<Issue>>;

    async fn create_label(&self, label: &LabelSpec) -> Result<LabelOutcome>;
}

/// reqwest-backed client for one repository.
pub struct RestGitHubApi {
    client: Client,
    api_url: String,
    owner: String,
    repo: String,
    token: String,
}

impl RestGitHubApi {
    pub fn new(
        api_url: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            owner: owner.into(),
            repo: repo.into(),
            token: token.into(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_url, path))
            .bearer_auth(&self.token)
            .header("accept", "application/vnd.github+json")
            .header("x-github-api-version", API_VERSION)
    }

    fn repo_path(&self, suffix: &str) -> String {
        format!("/repos/{}/{}{}", self.owner, self.repo, suffix)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| DevlogError::BackendUnavailable(format!("GitHub request failed: {}", e)))?;
        check_status(response).await
    }
}

fn header_u64(response: &Response, name: &str) -> Option<u64> {
    response
        .headers()
        .get(name)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

/// Map quota and error statuses onto `DevlogError`.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let exhausted = header_u64(&response, "x-ratelimit-remaining") == Some(0);
    if status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && exhausted) {
        let retry_after = header_u64(&response, "retry-after")
            .map(Duration::from_secs)
            .or_else(|| {
                header_u64(&response, "x-ratelimit-reset").map(|reset| {
                    let now = Utc::now().timestamp().max(0) as u64;
                    Duration::from_secs(reset.saturating_sub(now))
                })
            })
            .unwrap_or(DEFAULT_RETRY_AFTER);
        return Err(DevlogError::RateLimited { retry_after });
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(text);
    Err(DevlogError::GitHub {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl GitHubApi for RestGitHubApi {
    async fn get_repository(&self) -> Result<RepositoryInfo> {
        let response = self.send(self.request(Method::GET, &self.repo_path(""))).await?;
        Ok(response.json().await?)
    }

    async fn get_issue(&self, number: u64) -> Result<Option<Issue>> {
        let path = self.repo_path(&format!("/issues/{}", number));
        match self.send(self.request(Method::GET, &path)).await {
            Ok(response) => Ok(Some(response.json().await?)),
            Err(DevlogError::GitHub { status: 404 | 410, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_issue(&self, draft: &IssueDraft) -> Result<Issue> {
        let builder = self.request(Method::POST, &self.repo_path("/issues")).json(draft);
        Ok(self.send(builder).await?.json().await?)
    }

    async fn update_issue(&self, number: u64, draft: &IssueDraft) -> Result<Issue> {
        let path = self.repo_path(&format!("/issues/{}", number));
        let builder = self.request(Method::PATCH, &path).json(draft);
        Ok(self.send(builder).await?.json().await?)
    }

    async fn list_issues(&self, labels: &[String], page: u32, per_page: u32) -> Result<Vec<Issue>> {
        let mut query = vec![
            ("state", "all".to_string()),
            ("per_page", per_page.to_string()),
            ("page", page.to_string()),
        ];
        if !labels.is_empty() {
            query.push(("labels", labels.join(",")));
        }
        let builder = self.request(Method::GET, &self.repo_path("/issues")).query(&query);
        Ok(self.send(builder).await?.json().await?)
    }

    async fn search_issues(&self, query: &str) -> Result<Vec<Issue>> {
        let builder = self
            .request(Method::GET, "/search/issues")
            .query(&[("q", query), ("per_page", "100")]);
        let response: SearchResponse = self.send(builder).await?.json().await?;
        Ok(response.items)
    }

    async fn create_label(&self, label: &LabelSpec) -> Result<LabelOutcome> {
        let builder = self.request(Method::POST, &self.repo_path("/labels")).json(label);
        match self.send(builder).await {
            Ok(_) => Ok(LabelOutcome::Created),
            Err(DevlogError::GitHub { status: 422, .. }) => Ok(LabelOutcome::AlreadyExists),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_deserializes_from_rest_shape() {
        let json = r#"{
            "number": 12,
            "title": "Add login",
            "body": null,
            "state": "closed",
            "labels": [{"name": "devlog-type:feature", "color": "0e8a16"}],
            "html_url": "https://github.com/acme/tracker/issues/12",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-02T00:00:00Z",
            "closed_at": "2026-01-02T00:00:00Z",
            "user": {"login": "octocat"}
        }"#;
        let issue: Issue = serde_json::from_str(json).unwrap();
        assert_eq!(issue.number, 12);
        assert_eq!(issue.state, IssueState::Closed);
        assert_eq!(issue.label_names(), vec!["devlog-type:feature"]);
        assert!(!issue.is_pull_request());
        assert!(issue.body.is_none());
    }

    #[test]
    fn test_draft_omits_unset_state() {
        let draft = IssueDraft {
            title: "T".into(),
            body: "B".into(),
            labels: vec!["x".into()],
            state: None,
        };
        let json = serde_json::to_value(&draft).unwrap();
        assert!(json.get("state").is_none());

        let closed = IssueDraft {
            state: Some(IssueState::Closed),
            ..draft
        };
        assert_eq!(serde_json::to_value(&closed).unwrap()["state"], "closed");
    }

    #[test]
    fn test_client_trims_api_url() {
        let api = RestGitHubApi::new("https://ghe.example.com/api/v3/", "acme", "tracker", "t").unwrap();
        assert_eq!(api.api_url, "https://ghe.example.com/api/v3");
        assert_eq!(api.repo_path("/issues"), "/repos/acme/tracker/issues");
    }
}
