// Comment writes. Composes the stored body (metadata preamble for anchored
// comments, attribution preamble for anonymous ones) and enforces ownership
// on update/delete before any mutation reaches GitHub.

use chrono::{DateTime, Utc};

use crate::comments::{format_attribution, format_metadata};
use crate::error::ApiError;
use crate::github::GitHubClient;

/// Reference to a freshly created comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentRef {
    pub id: u64,
    pub pr_number: u64,
    pub html_url: String,
    pub created_at: DateTime<Utc>,
}

/// Reference to an updated comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedRef {
    pub id: u64,
    pub updated_at: DateTime<Utc>,
}

/// A comment as requested by the caller, before body composition.
#[derive(Debug, Clone)]
pub struct NewComment {
    pub file_path: String,
    pub body: String,
    pub line_number: Option<u64>,
    pub selected_text: Option<String>,
    pub in_reply_to: Option<u64>,
}

/// Who is writing. Authenticated writes go out under the caller's own token;
/// anonymous writes go out under the bot token with an attribution preamble.
#[derive(Debug, Clone)]
pub enum WriteIdentity {
    Authenticated,
    Anonymous { name: String },
}

/// Post a comment on the PR. The client must already be built for the right
/// token (the user's for authenticated writes, the bot's for anonymous ones).
pub fn create_comment(
    client: &dyn GitHubClient,
    owner: &str,
    repo: &str,
    pr_number: u64,
    new: &NewComment,
    identity: &WriteIdentity,
    now: DateTime<Utc>,
) -> Result<CommentRef, ApiError> {
    let mut body = match identity {
        WriteIdentity::Authenticated => new.body.clone(),
        WriteIdentity::Anonymous { name } => {
            format!("{}{}", format_attribution(name, now), new.body)
        }
    };

    // Anchored comments carry their location in the body. Inline review
    // comments are not an option on a merged PR, so everything is stored as
    // an issue comment and retyped on read. Replies post as plain comments.
    if new.line_number.is_some() || new.selected_text.is_some() {
        body = format!(
            "{}{body}",
            format_metadata(&new.file_path, new.line_number, new.selected_text.as_deref())
        );
    }

    let comment = client
        .create_issue_comment(owner, repo, pr_number, &body)
        .map_err(|e| ApiError::upstream("Failed to create comment", e))?;

    Ok(CommentRef {
        id: comment.id,
        pr_number,
        html_url: comment.html_url,
        created_at: comment.created_at,
    })
}

fn check_ownership(
    client: &dyn GitHubClient,
    owner: &str,
    repo: &str,
    comment_id: u64,
    login: &str,
    action: &str,
) -> Result<(), ApiError> {
    let existing = client
        .get_issue_comment(owner, repo, comment_id)
        .map_err(|e| ApiError::upstream(format!("Failed to {action} comment"), e))?;

    let author = existing.user.as_ref().map(|u| u.login.as_str());
    if author != Some(login) {
        return Err(ApiError::Forbidden(format!(
            "Only the comment author can {action} it"
        )));
    }
    Ok(())
}

/// Edit a comment. The caller must be its recorded GitHub author; on a
/// mismatch nothing is sent to GitHub.
pub fn update_comment(
    client: &dyn GitHubClient,
    owner: &str,
    repo: &str,
    comment_id: u64,
    body: &str,
    login: &str,
) -> Result<UpdatedRef, ApiError> {
    check_ownership(client, owner, repo, comment_id, login, "edit")?;

    let updated = client
        .update_issue_comment(owner, repo, comment_id, body)
        .map_err(|e| ApiError::upstream("Failed to update comment", e))?;
    Ok(UpdatedRef {
        id: updated.id,
        updated_at: updated.updated_at,
    })
}

/// Delete a comment, under the same ownership rule as update.
pub fn delete_comment(
    client: &dyn GitHubClient,
    owner: &str,
    repo: &str,
    comment_id: u64,
    login: &str,
) -> Result<(), ApiError> {
    check_ownership(client, owner, repo, comment_id, login, "delete")?;

    client
        .delete_issue_comment(owner, repo, comment_id)
        .map_err(|e| ApiError::upstream("Failed to delete comment", e))
}
