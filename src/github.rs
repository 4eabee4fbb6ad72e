// GitHub REST API client for comment storage.
// One client per token: handlers build a user-token client from the session
// and a bot-token client from the cached credential.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Mutex;

use crate::comments::Reactions;

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("prwiki/", env!("CARGO_PKG_VERSION"));
const PER_PAGE: u32 = 100;

/// A GitHub account as it appears on comments and PRs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GhUser {
    pub login: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub html_url: String,
}

/// Issue comment record (plain PR conversation comment).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueComment {
    pub id: u64,
    pub user: Option<GhUser>,
    #[serde(default)]
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub html_url: String,
    #[serde(default)]
    pub reactions: Option<Reactions>,
}

/// Inline review comment record (anchored to a file and line).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewComment {
    pub id: u64,
    pub user: Option<GhUser>,
    #[serde(default)]
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub html_url: String,
    pub path: String,
    #[serde(default)]
    pub line: Option<u64>,
    #[serde(default)]
    pub original_line: Option<u64>,
    #[serde(default)]
    pub in_reply_to_id: Option<u64>,
    #[serde(default)]
    pub reactions: Option<Reactions>,
}

/// Review record; only its top-level body is rendered as a comment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: u64,
    pub user: Option<GhUser>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub state: String,
    pub html_url: String,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
}

/// Pull request record, trimmed to the fields the site consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub state: String,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub user: Option<GhUser>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    pub html_url: String,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(default)]
    pub head: Option<GitRef>,
    #[serde(default)]
    pub base: Option<GitRef>,
}

/// One changed file in a PR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub filename: String,
    #[serde(default)]
    pub status: String,
}

/// Trait for GitHub operations, allowing test implementations.
pub trait GitHubClient {
    fn list_issue_comments(&self, owner: &str, repo: &str, issue: u64)
    -> Result<Vec<IssueComment>>;
    fn list_review_comments(&self, owner: &str, repo: &str, pull: u64)
    -> Result<Vec<ReviewComment>>;
    fn list_reviews(&self, owner: &str, repo: &str, pull: u64) -> Result<Vec<Review>>;

    fn get_pull(&self, owner: &str, repo: &str, pull: u64) -> Result<PullRequest>;
    fn list_closed_pulls(&self, owner: &str, repo: &str, page: u32) -> Result<Vec<PullRequest>>;
    fn list_pull_files(&self, owner: &str, repo: &str, pull: u64) -> Result<Vec<FileChange>>;
    /// List PRs (any state) whose head is `owner:branch`.
    fn list_pulls_by_head(&self, owner: &str, repo: &str, head: &str) -> Result<Vec<PullRequest>>;

    fn get_issue_comment(&self, owner: &str, repo: &str, comment_id: u64) -> Result<IssueComment>;
    fn create_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        issue: u64,
        body: &str,
    ) -> Result<IssueComment>;
    fn update_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        comment_id: u64,
        body: &str,
    ) -> Result<IssueComment>;
    fn delete_issue_comment(&self, owner: &str, repo: &str, comment_id: u64) -> Result<()>;

    /// Default branch name and its head commit sha.
    fn default_branch(&self, owner: &str, repo: &str) -> Result<(String, String)>;
    fn create_branch(&self, owner: &str, repo: &str, branch: &str, sha: &str) -> Result<()>;
    /// Create or update a file on a branch.
    fn put_file(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<()>;
    fn create_pull(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        head: &str,
        base: &str,
        body: &str,
    ) -> Result<PullRequest>;
    fn merge_pull(&self, owner: &str, repo: &str, pull: u64) -> Result<()>;
}

/// Builds a client for a given token. Handlers need this because the token
/// is only known per request (user session vs bot credential).
pub trait ClientFactory {
    fn for_token(&self, token: &str) -> Box<dyn GitHubClient>;
}

pub struct RealClientFactory;

impl ClientFactory for RealClientFactory {
    fn for_token(&self, token: &str) -> Box<dyn GitHubClient> {
        Box::new(RealGitHubClient::new(token.to_string()))
    }
}

/// Real GitHub client using blocking reqwest.
pub struct RealGitHubClient {
    http: reqwest::blocking::Client,
    token: String,
}

impl RealGitHubClient {
    pub fn new(token: String) -> Self {
        Self {
            http: reqwest::blocking::Client::new(),
            token,
        }
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::blocking::Response> {
        let url = format!("{API_BASE}{path}");
        let mut req = self
            .http
            .request(method, &url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT);
        if let Some(body) = body {
            req = req.json(&body);
        }

        let response = req
            .send()
            .with_context(|| format!("Failed to send request to GitHub: {path}"))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            anyhow::bail!("GitHub API error {status} for {path}: {}", detail.trim());
        }
        Ok(response)
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(reqwest::Method::GET, path, None)?
            .json()
            .with_context(|| format!("Failed to parse GitHub response for {path}"))
    }

    fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        self.request(method, path, Some(body))?
            .json()
            .with_context(|| format!("Failed to parse GitHub response for {path}"))
    }
}

impl GitHubClient for RealGitHubClient {
    fn list_issue_comments(
        &self,
        owner: &str,
        repo: &str,
        issue: u64,
    ) -> Result<Vec<IssueComment>> {
        self.get_json(&format!(
            "/repos/{owner}/{repo}/issues/{issue}/comments?per_page={PER_PAGE}"
        ))
    }

    fn list_review_comments(
        &self,
        owner: &str,
        repo: &str,
        pull: u64,
    ) -> Result<Vec<ReviewComment>> {
        self.get_json(&format!(
            "/repos/{owner}/{repo}/pulls/{pull}/comments?per_page={PER_PAGE}"
        ))
    }

    fn list_reviews(&self, owner: &str, repo: &str, pull: u64) -> Result<Vec<Review>> {
        self.get_json(&format!(
            "/repos/{owner}/{repo}/pulls/{pull}/reviews?per_page={PER_PAGE}"
        ))
    }

    fn get_pull(&self, owner: &str, repo: &str, pull: u64) -> Result<PullRequest> {
        self.get_json(&format!("/repos/{owner}/{repo}/pulls/{pull}"))
    }

    fn list_closed_pulls(&self, owner: &str, repo: &str, page: u32) -> Result<Vec<PullRequest>> {
        self.get_json(&format!(
            "/repos/{owner}/{repo}/pulls?state=closed&per_page={PER_PAGE}&page={page}"
        ))
    }

    fn list_pull_files(&self, owner: &str, repo: &str, pull: u64) -> Result<Vec<FileChange>> {
        self.get_json(&format!(
            "/repos/{owner}/{repo}/pulls/{pull}/files?per_page={PER_PAGE}"
        ))
    }

    fn list_pulls_by_head(&self, owner: &str, repo: &str, head: &str) -> Result<Vec<PullRequest>> {
        self.get_json(&format!(
            "/repos/{owner}/{repo}/pulls?state=all&head={}&per_page={PER_PAGE}",
            urlencoding::encode(head)
        ))
    }

    fn get_issue_comment(&self, owner: &str, repo: &str, comment_id: u64) -> Result<IssueComment> {
        self.get_json(&format!(
            "/repos/{owner}/{repo}/issues/comments/{comment_id}"
        ))
    }

    fn create_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        issue: u64,
        body: &str,
    ) -> Result<IssueComment> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/repos/{owner}/{repo}/issues/{issue}/comments"),
            json!({ "body": body }),
        )
    }

    fn update_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        comment_id: u64,
        body: &str,
    ) -> Result<IssueComment> {
        self.send_json(
            reqwest::Method::PATCH,
            &format!("/repos/{owner}/{repo}/issues/comments/{comment_id}"),
            json!({ "body": body }),
        )
    }

    fn delete_issue_comment(&self, owner: &str, repo: &str, comment_id: u64) -> Result<()> {
        self.request(
            reqwest::Method::DELETE,
            &format!("/repos/{owner}/{repo}/issues/comments/{comment_id}"),
            None,
        )?;
        Ok(())
    }

    fn default_branch(&self, owner: &str, repo: &str) -> Result<(String, String)> {
        #[derive(Deserialize)]
        struct Repo {
            default_branch: String,
        }
        #[derive(Deserialize)]
        struct RefObject {
            sha: String,
        }
        #[derive(Deserialize)]
        struct Ref {
            object: RefObject,
        }

        let repo_info: Repo = self.get_json(&format!("/repos/{owner}/{repo}"))?;
        let head: Ref = self.get_json(&format!(
            "/repos/{owner}/{repo}/git/ref/heads/{}",
            urlencoding::encode(&repo_info.default_branch)
        ))?;
        Ok((repo_info.default_branch, head.object.sha))
    }

    fn create_branch(&self, owner: &str, repo: &str, branch: &str, sha: &str) -> Result<()> {
        self.request(
            reqwest::Method::POST,
            &format!("/repos/{owner}/{repo}/git/refs"),
            Some(json!({ "ref": format!("refs/heads/{branch}"), "sha": sha })),
        )?;
        Ok(())
    }

    fn put_file(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<()> {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(content);
        self.request(
            reqwest::Method::PUT,
            &format!("/repos/{owner}/{repo}/contents/{path}"),
            Some(json!({ "message": message, "content": encoded, "branch": branch })),
        )?;
        Ok(())
    }

    fn create_pull(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        head: &str,
        base: &str,
        body: &str,
    ) -> Result<PullRequest> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/repos/{owner}/{repo}/pulls"),
            json!({ "title": title, "head": head, "base": base, "body": body }),
        )
    }

    fn merge_pull(&self, owner: &str, repo: &str, pull: u64) -> Result<()> {
        self.request(
            reqwest::Method::PUT,
            &format!("/repos/{owner}/{repo}/pulls/{pull}/merge"),
            Some(json!({ "merge_method": "squash" })),
        )?;
        Ok(())
    }
}

/// A credential value together with its expiry.
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

/// Source of the bot credential, allowing test implementations.
pub trait TokenSource: Send + Sync {
    fn fetch(&self) -> Result<CachedToken>;
}

/// Bot token taken from configuration. The value itself does not rotate,
/// but it is still handed out through the cache so callers never hold a
/// credential past its TTL.
pub struct ConfigTokenSource {
    token: Option<String>,
}

impl ConfigTokenSource {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

/// How long a fetched bot credential stays usable before re-fetching.
const TOKEN_TTL_MINUTES: i64 = 50;

impl TokenSource for ConfigTokenSource {
    fn fetch(&self) -> Result<CachedToken> {
        let value = self
            .token
            .clone()
            .context("GITHUB_BOT_TOKEN is not configured")?;
        Ok(CachedToken {
            value,
            expires_at: Utc::now() + Duration::minutes(TOKEN_TTL_MINUTES),
        })
    }
}

/// Explicit bot-credential cache: `{value, expires_at}` plus an accessor that
/// refreshes on expiry. Owned by the server state and injected into handlers.
/// A redundant concurrent refresh is harmless since fetching is idempotent.
pub struct TokenCache {
    source: Box<dyn TokenSource>,
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(source: Box<dyn TokenSource>) -> Self {
        Self {
            source,
            slot: Mutex::new(None),
        }
    }

    /// Current token value, refreshed if missing or expired.
    pub fn get(&self) -> Result<String> {
        let mut slot = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let expired = match slot.as_ref() {
            Some(cached) => cached.expires_at <= Utc::now(),
            None => true,
        };
        if expired {
            *slot = Some(self.source.fetch()?);
        }

        match slot.as_ref() {
            Some(cached) => Ok(cached.value.clone()),
            None => anyhow::bail!("token cache is empty after refresh"),
        }
    }
}
