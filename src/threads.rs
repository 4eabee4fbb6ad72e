// Thread assembly: a flat, unordered batch of normalized comments for one PR
// becomes a forest of root comments with replies nested recursively.

use std::collections::HashMap;

use crate::comments::Comment;

/// Build the reply forest for one PR's comments.
///
/// Duplicate ids keep the first occurrence. A comment whose `in_reply_to_id`
/// resolves inside the batch nests under that parent in input order; a reply
/// whose parent is absent (or that points at itself) becomes a root. Roots
/// are ordered by line number ascending, with un-anchored roots after all
/// anchored ones, ties keeping input order.
pub fn build_forest(comments: Vec<Comment>) -> Vec<Comment> {
    let mut order: Vec<u64> = Vec::with_capacity(comments.len());
    let mut by_id: HashMap<u64, Comment> = HashMap::with_capacity(comments.len());
    for comment in comments {
        if by_id.contains_key(&comment.id) {
            continue;
        }
        order.push(comment.id);
        by_id.insert(comment.id, comment);
    }

    let mut children: HashMap<u64, Vec<u64>> = HashMap::new();
    let mut root_ids: Vec<u64> = Vec::new();
    for &id in &order {
        let parent = by_id[&id].in_reply_to_id.filter(|&p| p != id);
        match parent {
            Some(parent) if by_id.contains_key(&parent) => {
                children.entry(parent).or_default().push(id);
            }
            _ => root_ids.push(id),
        }
    }

    let mut roots: Vec<Comment> = root_ids
        .into_iter()
        .filter_map(|id| assemble(id, &mut by_id, &children))
        .collect();
    roots.sort_by_key(|root| root.line_number.unwrap_or(u64::MAX));
    roots
}

fn assemble(
    id: u64,
    by_id: &mut HashMap<u64, Comment>,
    children: &HashMap<u64, Vec<u64>>,
) -> Option<Comment> {
    let mut comment = by_id.remove(&id)?;
    if let Some(child_ids) = children.get(&id) {
        comment.replies = child_ids
            .iter()
            .filter_map(|&child| assemble(child, by_id, children))
            .collect();
    }
    Some(comment)
}
