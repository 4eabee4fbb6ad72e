// Comment normalization: three GitHub record shapes (issue comments, inline
// review comments, review bodies) become one uniform Comment record.
// Bodies may carry machine-written preambles (file/line metadata, anonymous
// attribution) which are parsed out here.

use chrono::{DateTime, Utc};
use lazy_regex::{Lazy, Regex, lazy_regex};
use serde::{Deserialize, Serialize};

use crate::github::{GhUser, IssueComment, Review, ReviewComment};

/// The 8 GitHub reaction counters. Always fully populated on normalized
/// output; any key missing from the source defaults to 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reactions {
    #[serde(rename = "+1", default)]
    pub plus_one: u32,
    #[serde(rename = "-1", default)]
    pub minus_one: u32,
    #[serde(default)]
    pub laugh: u32,
    #[serde(default)]
    pub hooray: u32,
    #[serde(default)]
    pub confused: u32,
    #[serde(default)]
    pub heart: u32,
    #[serde(default)]
    pub rocket: u32,
    #[serde(default)]
    pub eyes: u32,
}

impl Reactions {
    /// Total normalization: a missing reactions object means all zeros.
    pub fn normalized(raw: Option<Reactions>) -> Reactions {
        raw.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommentType {
    Comment,
    ReviewComment,
    Review,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub name: String,
    pub avatar_url: String,
    pub profile_url: String,
}

impl Author {
    fn from_user(user: Option<&GhUser>) -> Author {
        match user {
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
        }
    }
}

/// Uniform comment record served to the site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: u64,
    pub author: Author,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: CommentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_text: Option<String>,
    pub reactions: Reactions,
    #[serde(default)]
    pub replies: Vec<Comment>,
    #[serde(default)]
    pub in_reply_to_id: Option<u64>,
}

// Body preamble for comments that carry location metadata:
//   _파일: `<path>`[, 라인: <n>]_
//   [> <selected text>]
//   <blank line>
//   <body>
static META_RE: Lazy<Regex> = lazy_regex!(r"^_파일: `([^`]+)`(?:, 라인: (\d+))?_");
static QUOTE_RE: Lazy<Regex> = lazy_regex!(r"(?s)^_파일: `[^`]+`(?:, 라인: \d+)?_\n> (.+?)(?:\n\n|$)");
static STRIP_RE: Lazy<Regex> = lazy_regex!(r"(?s)^_파일: `[^`]+`(?:, 라인: \d+)?_\n(?:> .+?\n\n)?");

// Attribution preamble prepended to anonymous (bot-written) comments:
//   > **작성자**: <name>
//   > **작성 시각**: <ISO timestamp>
//   <blank line>
//   <body>
static ATTR_RE: Lazy<Regex> =
    lazy_regex!(r"(?s)^> \*\*작성자\*\*: (.+?)\n> \*\*작성 시각\*\*: (.+?)\n\n(.*)$");

/// Location metadata recovered from a comment body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyMetadata {
    pub file_path: Option<String>,
    pub line_number: Option<u64>,
    pub selected_text: Option<String>,
    pub clean_body: String,
}

/// Parse the metadata preamble out of a body. Lenient: a body that does not
/// match the preamble grammar is returned whole as `clean_body`, never an
/// error — showing an unparsed comment beats dropping it.
pub fn parse_metadata(body: &str) -> BodyMetadata {
    let Some(caps) = META_RE.captures(body) else {
        return BodyMetadata {
            clean_body: body.to_string(),
            ..BodyMetadata::default()
        };
    };

    let file_path = Some(caps[1].to_string());
    let line_number = caps.get(2).and_then(|m| m.as_str().parse().ok());
    let selected_text = QUOTE_RE
        .captures(body)
        .map(|caps| caps[1].trim().to_string());
    let clean_body = STRIP_RE.replace(body, "").trim().to_string();

    BodyMetadata {
        file_path,
        line_number,
        selected_text,
        clean_body,
    }
}

/// Render the metadata preamble written ahead of location-carrying comments.
pub fn format_metadata(
    file_path: &str,
    line_number: Option<u64>,
    selected_text: Option<&str>,
) -> String {
    let mut metadata = format!("_파일: `{file_path}`");
    if let Some(line) = line_number {
        metadata.push_str(&format!(", 라인: {line}"));
    }
    match selected_text {
        Some(selected) => metadata.push_str(&format!("_\n> {selected}\n\n")),
        None => metadata.push_str("_\n\n"),
    }
    metadata
}

/// Render the attribution preamble for anonymous (bot-authored) comments.
pub fn format_attribution(name: &str, timestamp: DateTime<Utc>) -> String {
    format!(
        "> **작성자**: {name}\n> **작성 시각**: {}\n\n",
        timestamp.to_rfc3339()
    )
}

/// Recover the true author of an anonymous comment from its attribution
/// preamble. Returns the display name and the remaining body.
pub fn parse_attribution(body: &str) -> Option<(String, String)> {
    let caps = ATTR_RE.captures(body)?;
    Some((caps[1].to_string(), caps[3].trim().to_string()))
}

/// Normalize a plain issue comment. Comments that encode a line number or a
/// selected snippet in their metadata preamble are retyped `review-comment`.
pub fn normalize_issue_comment(comment: &IssueComment) -> Comment {
    let raw_body = comment.body.as_deref().unwrap_or_default();
    let meta = parse_metadata(raw_body);

    let mut author = Author::from_user(comment.user.as_ref());
    let body = match parse_attribution(&meta.clean_body) {
        Some((name, rest)) => {
            author.name = name;
            rest
        }
        None => meta.clean_body,
    };

    let kind = if meta.line_number.is_some() || meta.selected_text.is_some() {
        CommentType::ReviewComment
    } else {
        CommentType::Comment
    };

    Comment {
        id: comment.id,
        author,
        body,
        created_at: comment.created_at,
        updated_at: comment.updated_at,
        url: comment.html_url.clone(),
        kind,
        file_path: meta.file_path,
        line_number: meta.line_number,
        selected_text: meta.selected_text,
        reactions: Reactions::normalized(comment.reactions),
        replies: Vec::new(),
        in_reply_to_id: None,
    }
}

/// Normalize an inline review comment. File and line come from the record
/// itself; the body may still carry a quoted selection in its preamble.
pub fn normalize_review_comment(comment: &ReviewComment) -> Comment {
    let meta = parse_metadata(&comment.body);

    Comment {
        id: comment.id,
        author: Author::from_user(comment.user.as_ref()),
        body: meta.clean_body,
        created_at: comment.created_at,
        updated_at: comment.updated_at,
        url: comment.html_url.clone(),
        kind: CommentType::ReviewComment,
        file_path: Some(comment.path.clone()),
        line_number: comment.line.or(comment.original_line),
        selected_text: meta.selected_text,
        reactions: Reactions::normalized(comment.reactions),
        replies: Vec::new(),
        in_reply_to_id: comment.in_reply_to_id,
    }
}

/// Normalize a review body. Reviews without text (or never submitted) carry
/// nothing to display and are skipped.
pub fn normalize_review(review: &Review) -> Option<Comment> {
    let body = review.body.as_deref()?.trim();
    if body.is_empty() {
        return None;
    }
    let submitted_at = review.submitted_at?;

    Some(Comment {
        id: review.id,
        author: Author::from_user(review.user.as_ref()),
        body: body.to_string(),
        created_at: submitted_at,
        updated_at: submitted_at,
        url: review.html_url.clone(),
        kind: CommentType::Review,
        file_path: None,
        line_number: None,
        selected_text: None,
        reactions: Reactions::default(),
        replies: Vec::new(),
        in_reply_to_id: None,
    })
}
