//! Seams between the bot and the forum it runs against.
//!
//! The Reddit client implements these over HTTP; tests implement them in memory.

use crate::error::CoreError;
use crate::types::{
    ContentItem, PostedReply, SaleListing, SearchRequest, Submission, ThreadNode, ThreadRef,
};
use async_trait::async_trait;

/// A pollable feed of new items. Polling never waits for new content.
#[async_trait]
pub trait ContentStream: Send {
    /// Returns the next unseen item, or `None` when nothing new is available right now.
    async fn poll_next(&mut self) -> Result<Option<ContentItem>, CoreError>;

    fn name(&self) -> &str;
}

#[async_trait]
pub trait ForumApi: Send + Sync {
    /// Current state of a submission, including its category label.
    async fn submission(&self, id: &str) -> Result<Submission, CoreError>;

    /// Authors of the submission's top-level comments.
    async fn submission_reply_authors(&self, id: &str) -> Result<Vec<Option<String>>, CoreError>;

    /// Fresh read of one comment and its direct replies.
    async fn comment_node(&self, submission_id: &str, comment_id: &str)
        -> Result<ThreadNode, CoreError>;

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SaleListing>, CoreError>;

    async fn reply(&self, parent: &ThreadRef, body: &str) -> Result<PostedReply, CoreError>;
}
