// PR location: every wiki file gets one PR that holds its comment thread.
// Resolution is search-first so repeated calls for the same file are
// idempotent; the PR is created and merged only when none exists yet.

use anyhow::{Context, Result};

use crate::github::GitHubClient;

const BRANCH_PREFIX: &str = "comments/";

/// Resolves a wiki file path to the PR number its comments live on.
pub trait PrLocator {
    fn resolve_pr(&self, file_path: &str) -> Result<u64>;
}

/// Deterministic branch slug for a file path: alphanumerics survive, every
/// other run of characters collapses to a single `-`.
fn branch_slug(file_path: &str) -> String {
    let mut slug = String::with_capacity(file_path.len());
    let mut pending_dash = false;
    for ch in file_path.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
    }
    slug
}

pub struct GitHubPrLocator<'a> {
    owner: &'a str,
    repo: &'a str,
    client: &'a dyn GitHubClient,
}

impl<'a> GitHubPrLocator<'a> {
    pub fn new(owner: &'a str, repo: &'a str, client: &'a dyn GitHubClient) -> Self {
        Self {
            owner,
            repo,
            client,
        }
    }

    fn create_thread_pr(&self, file_path: &str, branch: &str) -> Result<u64> {
        let (base, sha) = self
            .client
            .default_branch(self.owner, self.repo)
            .context("Failed to resolve default branch")?;
        self.client
            .create_branch(self.owner, self.repo, branch, &sha)
            .with_context(|| format!("Failed to create branch {branch}"))?;

        let marker_path = format!(".comments/{}.md", branch_slug(file_path));
        self.client
            .put_file(
                self.owner,
                self.repo,
                branch,
                &marker_path,
                &format!("댓글 스레드: `{file_path}`\n"),
                &format!("chore: comment thread for {file_path}"),
            )
            .context("Failed to write thread marker file")?;

        let pr = self
            .client
            .create_pull(
                self.owner,
                self.repo,
                &format!("💬 댓글: {file_path}"),
                branch,
                &base,
                &format!("`{file_path}` 문서의 댓글 스레드입니다."),
            )
            .context("Failed to open thread PR")?;
        self.client
            .merge_pull(self.owner, self.repo, pr.number)
            .with_context(|| format!("Failed to merge thread PR #{}", pr.number))?;
        Ok(pr.number)
    }
}

impl PrLocator for GitHubPrLocator<'_> {
    fn resolve_pr(&self, file_path: &str) -> Result<u64> {
        let branch = format!("{BRANCH_PREFIX}{}", branch_slug(file_path));
        let head = format!("{}:{branch}", self.owner);

        let existing = self
            .client
            .list_pulls_by_head(self.owner, self.repo, &head)
            .context("Failed to search for comment thread PR")?;
        if let Some(pr) = existing.first() {
            return Ok(pr.number);
        }

        self.create_thread_pr(file_path, &branch)
    }
}
