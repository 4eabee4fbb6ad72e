// Inline annotation planning: which rendered lines carry comments and where
// reply threads should be inserted. Pure data in, pure data out; applying
// the plan to markup is the view layer's job.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::comments::Comment;

/// One annotated line: the line number (1-based) and the ids of the root
/// comments anchored there, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineAnnotation {
    pub line: u64,
    pub comment_ids: Vec<u64>,
}

/// Plan the annotations for a rendered document of `line_count` lines.
/// Comments without a line anchor are skipped; anchors past the end clamp to
/// the last line. Output is ordered by line.
pub fn annotations(line_count: u64, comments: &[Comment]) -> Vec<LineAnnotation> {
    if line_count == 0 {
        return Vec::new();
    }

    let mut by_line: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
    for comment in comments {
        let Some(line) = comment.line_number else {
            continue;
        };
        let line = line.clamp(1, line_count);
        by_line.entry(line).or_default().push(comment.id);
    }

    by_line
        .into_iter()
        .map(|(line, comment_ids)| LineAnnotation { line, comment_ids })
        .collect()
}
