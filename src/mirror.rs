// Build-time mirror: snapshots merged-PR discussion into per-PR JSON files,
// then derives the two static artifacts the site loads (recent PRs and the
// file-to-discussion map).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lazy_regex::{Lazy, Regex, lazy_regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::comments::{
    Author, Comment, normalize_issue_comment, normalize_review, normalize_review_comment,
};
use crate::github::{FileChange, GitHubClient, IssueComment, PullRequest, Review, ReviewComment};
use crate::threads::build_forest;

static PR_FILE_RE: Lazy<Regex> = lazy_regex!(r"^pr-(\d+)\.json$");

/// One PR's raw snapshot as stored under the data dir (`pr-<n>.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrDataFile {
    pub pr: PullRequest,
    pub comments: Vec<IssueComment>,
    pub review_comments: Vec<ReviewComment>,
    pub reviews: Vec<Review>,
    pub files: Vec<FileChange>,
    pub last_updated: DateTime<Utc>,
}

/// PR summary served in `prs-recent.json` and alongside each file entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrSummary {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub author: Author,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub url: String,
    pub labels: Vec<crate::github::Label>,
    pub comment_count: usize,
    pub review_count: usize,
    pub changed_files: Vec<String>,
    pub additions: u64,
    pub deletions: u64,
}

/// One entry in `prs-by-file.json`: the PR plus its comment forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDiscussion {
    pub pr: PrSummary,
    pub comments: Vec<Comment>,
}

pub fn transform_summary(data: &PrDataFile) -> PrSummary {
    let pr = &data.pr;
    let author = match &pr.user {
        Some(user) => Author {
            name: user.login.clone(),
            avatar_url: user.avatar_url.clone(),
            profile_url: user.html_url.clone(),
        },
        None => Author {
            name: "Unknown".to_string(),
            avatar_url: String::new(),
            profile_url: String::new(),
        },
    };

    let review_bodies = data
        .reviews
        .iter()
        .filter(|r| r.body.as_deref().is_some_and(|b| !b.is_empty()))
        .count();

    PrSummary {
        number: pr.number,
        title: pr.title.clone(),
        state: if pr.merged_at.is_some() {
            "merged".to_string()
        } else {
            pr.state.clone()
        },
        author,
        created_at: pr.created_at,
        updated_at: pr.updated_at,
        merged_at: pr.merged_at,
        url: pr.html_url.clone(),
        labels: pr.labels.clone(),
        comment_count: data.comments.len() + data.review_comments.len() + review_bodies,
        review_count: data.reviews.len(),
        changed_files: data.files.iter().map(|f| f.filename.clone()).collect(),
        additions: pr.additions,
        deletions: pr.deletions,
    }
}

/// Normalize all three comment sources and assemble the reply forest.
pub fn transform_comments(data: &PrDataFile) -> Vec<Comment> {
    let mut comments: Vec<Comment> = Vec::new();
    comments.extend(data.comments.iter().map(normalize_issue_comment));
    comments.extend(data.review_comments.iter().map(normalize_review_comment));
    comments.extend(data.reviews.iter().filter_map(normalize_review));
    build_forest(comments)
}

fn existing_pr_numbers(data_dir: &Path) -> Vec<u64> {
    let Ok(entries) = std::fs::read_dir(data_dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let caps = PR_FILE_RE.captures(name.to_str()?)?;
            caps[1].parse().ok()
        })
        .collect()
}

fn fetch_all_merged_prs(
    client: &dyn GitHubClient,
    owner: &str,
    repo: &str,
) -> Result<Vec<PullRequest>> {
    let mut merged = Vec::new();
    let mut page = 1;
    loop {
        let prs = client
            .list_closed_pulls(owner, repo, page)
            .with_context(|| format!("Failed to list closed PRs (page {page})"))?;
        // termination does not assume the client's page size
        if prs.is_empty() {
            break;
        }
        merged.extend(prs.into_iter().filter(|pr| pr.merged_at.is_some()));
        page += 1;
    }
    Ok(merged)
}

fn fetch_pr_details(
    client: &dyn GitHubClient,
    owner: &str,
    repo: &str,
    number: u64,
) -> Result<PrDataFile> {
    Ok(PrDataFile {
        pr: client.get_pull(owner, repo, number)?,
        comments: client.list_issue_comments(owner, repo, number)?,
        review_comments: client.list_review_comments(owner, repo, number)?,
        reviews: client.list_reviews(owner, repo, number)?,
        files: client.list_pull_files(owner, repo, number)?,
        last_updated: Utc::now(),
    })
}

/// Fetch snapshots for merged PRs not yet present under the data dir.
/// A failure on one PR is logged and skipped so the rest still sync.
pub fn sync_merged_prs(
    client: &dyn GitHubClient,
    owner: &str,
    repo: &str,
    data_dir: &Path,
) -> Result<usize> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;

    let existing = existing_pr_numbers(data_dir);
    let merged = fetch_all_merged_prs(client, owner, repo)?;
    tracing::info!(total = merged.len(), "merged PRs found");

    let mut synced = 0;
    for pr in merged {
        if existing.contains(&pr.number) {
            continue;
        }
        tracing::info!(number = pr.number, title = %pr.title, "fetching PR snapshot");
        match fetch_pr_details(client, owner, repo, pr.number) {
            Ok(data) => {
                let path = data_dir.join(format!("pr-{}.json", pr.number));
                let json = serde_json::to_string_pretty(&data)
                    .context("Failed to serialize PR snapshot")?;
                std::fs::write(&path, json)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                synced += 1;
            }
            Err(error) => {
                tracing::warn!(number = pr.number, %error, "failed to fetch PR, skipping");
            }
        }
    }
    Ok(synced)
}

/// Derive `prs-recent.json` and `prs-by-file.json` from the local snapshots.
pub fn generate_artifacts(data_dir: &Path, output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let mut numbers = existing_pr_numbers(data_dir);
    numbers.sort_unstable();

    let mut recent: Vec<PrSummary> = Vec::new();
    let mut by_file: BTreeMap<String, Vec<FileDiscussion>> = BTreeMap::new();

    for number in numbers {
        let path = data_dir.join(format!("pr-{number}.json"));
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let data: PrDataFile = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        let summary = transform_summary(&data);
        let comments = transform_comments(&data);

        for file in &data.files {
            by_file
                .entry(file.filename.clone())
                .or_default()
                .push(FileDiscussion {
                    pr: summary.clone(),
                    comments: comments.clone(),
                });
        }
        recent.push(summary);
    }

    recent.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    let recent_path = output_dir.join("prs-recent.json");
    std::fs::write(
        &recent_path,
        serde_json::to_string_pretty(&recent).context("Failed to serialize prs-recent.json")?,
    )
    .with_context(|| format!("Failed to write {}", recent_path.display()))?;
    tracing::info!(prs = recent.len(), path = %recent_path.display(), "generated");

    let by_file_path = output_dir.join("prs-by-file.json");
    std::fs::write(
        &by_file_path,
        serde_json::to_string_pretty(&by_file).context("Failed to serialize prs-by-file.json")?,
    )
    .with_context(|| format!("Failed to write {}", by_file_path.display()))?;
    tracing::info!(files = by_file.len(), path = %by_file_path.display(), "generated");

    Ok(())
}

/// The `mirror` subcommand: sync from GitHub (degrading to local data on
/// failure), then regenerate the artifacts.
pub fn run(client: &dyn GitHubClient, owner: &str, repo: &str, data_dir: &Path, output_dir: &Path) -> Result<()> {
    match sync_merged_prs(client, owner, repo, data_dir) {
        Ok(synced) => tracing::info!(synced, "PR sync complete"),
        Err(error) => {
            tracing::warn!(%error, "failed to sync from GitHub, using local data only");
        }
    }
    generate_artifacts(data_dir, output_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::GhUser;
    use anyhow::Result;
    use tempfile::tempdir;

    fn user(login: &str) -> Option<GhUser> {
        Some(GhUser {
            login: login.to_string(),
            avatar_url: format!("https://avatars.example/{login}"),
            html_url: format!("https://github.com/{login}"),
        })
    }

    fn pull(number: u64, merged: bool, updated_at: &str) -> PullRequest {
        PullRequest {
            number,
            state: "closed".to_string(),
            title: format!("PR {number}"),
            body: None,
            user: user("alice"),
            created_at: "2025-03-01T10:00:00Z".parse().unwrap(),
            updated_at: updated_at.parse().unwrap(),
            merged_at: merged.then(|| "2025-03-01T11:00:00Z".parse().unwrap()),
            html_url: format!("https://github.com/o/r/pull/{number}"),
            labels: Vec::new(),
            additions: 10,
            deletions: 2,
            head: None,
            base: None,
        }
    }

    fn issue_comment(id: u64, body: &str) -> IssueComment {
        IssueComment {
            id,
            user: user("bob"),
            body: Some(body.to_string()),
            created_at: "2025-03-01T10:00:00Z".parse().unwrap(),
            updated_at: "2025-03-01T10:00:00Z".parse().unwrap(),
            html_url: format!("https://github.com/o/r/pull/1#issuecomment-{id}"),
            reactions: None,
        }
    }

    fn data_file(number: u64, updated_at: &str, files: &[&str]) -> PrDataFile {
        PrDataFile {
            pr: pull(number, true, updated_at),
            comments: vec![issue_comment(number * 10, "첫 댓글")],
            review_comments: Vec::new(),
            reviews: vec![Review {
                id: number * 10 + 1,
                user: user("carol"),
                body: Some("LGTM".to_string()),
                state: "APPROVED".to_string(),
                html_url: String::new(),
                submitted_at: Some("2025-03-01T10:30:00Z".parse().unwrap()),
            }],
            files: files
                .iter()
                .map(|f| FileChange {
                    filename: f.to_string(),
                    status: "modified".to_string(),
                })
                .collect(),
            last_updated: "2025-03-02T00:00:00Z".parse().unwrap(),
        }
    }

    fn write_data_file(dir: &Path, data: &PrDataFile) {
        let path = dir.join(format!("pr-{}.json", data.pr.number));
        std::fs::write(path, serde_json::to_string_pretty(data).unwrap()).unwrap();
    }

    #[test]
    fn summary_counts_and_merged_state() {
        let data = data_file(3, "2025-03-02T09:00:00Z", &["docs/a.mdx"]);
        let summary = transform_summary(&data);

        assert_eq!(summary.number, 3);
        assert_eq!(summary.state, "merged");
        assert_eq!(summary.author.name, "alice");
        assert_eq!(summary.comment_count, 2); // one issue comment + one review body
        assert_eq!(summary.review_count, 1);
        assert_eq!(summary.changed_files, vec!["docs/a.mdx"]);
    }

    #[test]
    fn unmerged_pr_keeps_its_state() {
        let mut data = data_file(3, "2025-03-02T09:00:00Z", &[]);
        data.pr = pull(3, false, "2025-03-02T09:00:00Z");
        assert_eq!(transform_summary(&data).state, "closed");
    }

    #[test]
    fn comments_are_normalized_into_a_forest() {
        let mut data = data_file(1, "2025-03-02T09:00:00Z", &[]);
        data.review_comments = vec![ReviewComment {
            id: 20,
            user: user("dana"),
            body: "inline".to_string(),
            created_at: "2025-03-01T10:00:00Z".parse().unwrap(),
            updated_at: "2025-03-01T10:00:00Z".parse().unwrap(),
            html_url: String::new(),
            path: "docs/a.mdx".to_string(),
            line: Some(4),
            original_line: None,
            in_reply_to_id: None,
            reactions: None,
        }];

        let forest = transform_comments(&data);
        // anchored inline comment sorts ahead of the un-anchored ones
        assert_eq!(forest[0].id, 20);
        assert_eq!(forest.len(), 3);
    }

    #[test]
    fn artifacts_round_trip_through_the_filesystem() {
        let data_dir = tempdir().unwrap();
        let output_dir = tempdir().unwrap();

        write_data_file(
            data_dir.path(),
            &data_file(1, "2025-03-02T09:00:00Z", &["docs/a.mdx"]),
        );
        write_data_file(
            data_dir.path(),
            &data_file(2, "2025-03-03T09:00:00Z", &["docs/a.mdx", "docs/b.mdx"]),
        );

        generate_artifacts(data_dir.path(), output_dir.path()).unwrap();

        let recent: Vec<PrSummary> = serde_json::from_str(
            &std::fs::read_to_string(output_dir.path().join("prs-recent.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(recent.len(), 2);
        // most recently updated first
        assert_eq!(recent[0].number, 2);
        assert_eq!(recent[1].number, 1);

        let by_file: BTreeMap<String, Vec<FileDiscussion>> = serde_json::from_str(
            &std::fs::read_to_string(output_dir.path().join("prs-by-file.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(by_file["docs/a.mdx"].len(), 2);
        assert_eq!(by_file["docs/b.mdx"].len(), 1);
        assert_eq!(by_file["docs/b.mdx"][0].pr.number, 2);
        assert!(!by_file["docs/b.mdx"][0].comments.is_empty());
    }

    #[test]
    fn existing_snapshots_are_detected() {
        let data_dir = tempdir().unwrap();
        write_data_file(
            data_dir.path(),
            &data_file(7, "2025-03-02T09:00:00Z", &[]),
        );
        std::fs::write(data_dir.path().join("notes.txt"), "ignore me").unwrap();

        let mut numbers = existing_pr_numbers(data_dir.path());
        numbers.sort_unstable();
        assert_eq!(numbers, vec![7]);
    }

    /// Client that serves fixed pages of closed PRs and full details for each.
    struct TestGitHubClient {
        closed_pages: Vec<Vec<PullRequest>>,
        fail_details_for: Option<u64>,
    }

    impl GitHubClient for TestGitHubClient {
        fn list_issue_comments(&self, _: &str, _: &str, issue: u64) -> Result<Vec<IssueComment>> {
            if self.fail_details_for == Some(issue) {
                anyhow::bail!("502 Bad Gateway");
            }
            Ok(vec![issue_comment(issue * 10, "첫 댓글")])
        }
        fn list_review_comments(&self, _: &str, _: &str, _: u64) -> Result<Vec<ReviewComment>> {
            Ok(Vec::new())
        }
        fn list_reviews(&self, _: &str, _: &str, _: u64) -> Result<Vec<Review>> {
            Ok(Vec::new())
        }
        fn get_pull(&self, _: &str, _: &str, number: u64) -> Result<PullRequest> {
            Ok(pull(number, true, "2025-03-02T09:00:00Z"))
        }
        fn list_closed_pulls(&self, _: &str, _: &str, page: u32) -> Result<Vec<PullRequest>> {
            Ok(self
                .closed_pages
                .get(page as usize - 1)
                .cloned()
                .unwrap_or_default())
        }
        fn list_pull_files(&self, _: &str, _: &str, _: u64) -> Result<Vec<FileChange>> {
            Ok(Vec::new())
        }
        fn list_pulls_by_head(&self, _: &str, _: &str, _: &str) -> Result<Vec<PullRequest>> {
            unimplemented!()
        }
        fn get_issue_comment(&self, _: &str, _: &str, _: u64) -> Result<IssueComment> {
            unimplemented!()
        }
        fn create_issue_comment(&self, _: &str, _: &str, _: u64, _: &str) -> Result<IssueComment> {
            unimplemented!()
        }
        fn update_issue_comment(&self, _: &str, _: &str, _: u64, _: &str) -> Result<IssueComment> {
            unimplemented!()
        }
        fn delete_issue_comment(&self, _: &str, _: &str, _: u64) -> Result<()> {
            unimplemented!()
        }
        fn default_branch(&self, _: &str, _: &str) -> Result<(String, String)> {
            unimplemented!()
        }
        fn create_branch(&self, _: &str, _: &str, _: &str, _: &str) -> Result<()> {
            unimplemented!()
        }
        fn put_file(&self, _: &str, _: &str, _: &str, _: &str, _: &str, _: &str) -> Result<()> {
            unimplemented!()
        }
        fn create_pull(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<PullRequest> {
            unimplemented!()
        }
        fn merge_pull(&self, _: &str, _: &str, _: u64) -> Result<()> {
            unimplemented!()
        }
    }

    #[test]
    fn sync_fetches_only_missing_merged_prs() {
        let data_dir = tempdir().unwrap();
        write_data_file(
            data_dir.path(),
            &data_file(1, "2025-03-02T09:00:00Z", &[]),
        );

        let client = TestGitHubClient {
            closed_pages: vec![vec![
                pull(1, true, "2025-03-02T09:00:00Z"),
                pull(2, true, "2025-03-02T09:00:00Z"),
                pull(3, false, "2025-03-02T09:00:00Z"), // closed but not merged
            ]],
            fail_details_for: None,
        };

        let synced = sync_merged_prs(&client, "o", "r", data_dir.path()).unwrap();
        assert_eq!(synced, 1);
        assert!(data_dir.path().join("pr-2.json").exists());
        assert!(!data_dir.path().join("pr-3.json").exists());
    }

    #[test]
    fn page_walk_runs_until_an_empty_page() {
        let data_dir = tempdir().unwrap();
        let client = TestGitHubClient {
            closed_pages: vec![
                vec![pull(1, true, "2025-03-02T09:00:00Z")],
                vec![pull(2, true, "2025-03-02T09:00:00Z")],
            ],
            fail_details_for: None,
        };

        let synced = sync_merged_prs(&client, "o", "r", data_dir.path()).unwrap();
        assert_eq!(synced, 2);
        assert!(data_dir.path().join("pr-1.json").exists());
        assert!(data_dir.path().join("pr-2.json").exists());
    }

    #[test]
    fn one_failing_pr_does_not_stop_the_sync() {
        let data_dir = tempdir().unwrap();
        let client = TestGitHubClient {
            closed_pages: vec![vec![
                pull(1, true, "2025-03-02T09:00:00Z"),
                pull(2, true, "2025-03-02T09:00:00Z"),
            ]],
            fail_details_for: Some(1),
        };

        let synced = sync_merged_prs(&client, "o", "r", data_dir.path()).unwrap();
        assert_eq!(synced, 1);
        assert!(!data_dir.path().join("pr-1.json").exists());
        assert!(data_dir.path().join("pr-2.json").exists());
    }
}
