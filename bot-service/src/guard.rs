use salesbot_core::{
    same_user, ContentItem, CoreError, ForumApi, RedditApiError, ThreadRef,
};
use std::collections::HashSet;
use tracing::debug;

enum Walk {
    AtComment(String),
    Done(bool),
}

/// Whether `bot_identity` already replied to the item, or to any comment above it.
///
/// Submissions are checked against their top-level comments. Comments are checked
/// hop by hop up to the thread root, re-reading each ancestor so replies posted
/// since the stream yielded the item are seen.
pub async fn already_replied<F>(
    forum: &F,
    item: &ContentItem,
    bot_identity: &str,
) -> Result<bool, CoreError>
where
    F: ForumApi + ?Sized,
{
    let comment = match item {
        ContentItem::Submission(submission) => {
            let authors = forum.submission_reply_authors(&submission.id).await?;
            return Ok(authors
                .iter()
                .any(|author| same_user(author.as_deref(), bot_identity)));
        }
        ContentItem::Comment(comment) => comment,
    };

    let mut visited = HashSet::new();
    let mut state = Walk::AtComment(comment.id.clone());

    loop {
        state = match state {
            Walk::Done(found) => return Ok(found),
            Walk::AtComment(id) => {
                if !visited.insert(id.clone()) {
                    return Err(CoreError::RedditApi(RedditApiError::InvalidResponse {
                        details: format!("comment {} appears twice in its own ancestor chain", id),
                    }));
                }

                let node = forum.comment_node(&comment.submission_ref, &id).await?;
                if node
                    .reply_authors
                    .iter()
                    .any(|author| same_user(author.as_deref(), bot_identity))
                {
                    debug!("{}: found earlier reply under ancestor {}", comment.id, id);
                    Walk::Done(true)
                } else {
                    match node.parent_ref {
                        ThreadRef::Submission(_) => Walk::Done(false),
                        ThreadRef::Comment(parent) => Walk::AtComment(parent),
                    }
                }
            }
        };
    }
}
