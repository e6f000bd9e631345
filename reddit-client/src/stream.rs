use crate::api::RedditApiClient;
use async_trait::async_trait;
use salesbot_core::{ContentItem, ContentStream, CoreError};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Reddit listings return at most 100 items per request.
const LISTING_LIMIT: u32 = 100;
/// Ids remembered to suppress repeats across overlapping listing pages.
const SEEN_CAPACITY: usize = 301;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Submissions,
    Comments,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Submissions => "submissions",
            StreamKind::Comments => "comments",
        }
    }
}

/// Insertion-ordered set that forgets its oldest ids past a fixed capacity.
#[derive(Debug)]
pub struct SeenIds {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl SeenIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns `false` when the id was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.members.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.members.insert(id.to_string());
        true
    }

    #[cfg(test)]
    fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Turns newest-first listing pages into a queue of unseen items, oldest first.
#[derive(Debug)]
pub struct StreamBuffer {
    seen: SeenIds,
    pending: VecDeque<ContentItem>,
    skip_existing: bool,
    primed: bool,
}

impl StreamBuffer {
    pub fn new(skip_existing: bool) -> Self {
        Self {
            seen: SeenIds::new(SEEN_CAPACITY),
            pending: VecDeque::new(),
            skip_existing,
            primed: false,
        }
    }

    /// Queues the unseen items of one page. Returns how many were queued.
    pub fn ingest(&mut self, newest_first: Vec<ContentItem>) -> usize {
        let mut queued = 0;
        for item in newest_first.into_iter().rev() {
            if self.seen.insert(item.id()) {
                self.pending.push_back(item);
                queued += 1;
            }
        }

        if !self.primed {
            self.primed = true;
            if self.skip_existing {
                self.pending.clear();
                return 0;
            }
        }
        queued
    }

    pub fn pop(&mut self) -> Option<ContentItem> {
        self.pending.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Non-blocking stream over `/r/<subreddit>/new` or `/r/<subreddit>/comments`.
pub struct ListingStream {
    client: Arc<RedditApiClient>,
    subreddit: String,
    kind: StreamKind,
    name: String,
    buffer: StreamBuffer,
}

impl ListingStream {
    pub fn new(
        client: Arc<RedditApiClient>,
        subreddit: &str,
        kind: StreamKind,
        skip_existing: bool,
    ) -> Self {
        Self {
            client,
            subreddit: subreddit.to_string(),
            kind,
            name: format!("r/{} {}", subreddit, kind.as_str()),
            buffer: StreamBuffer::new(skip_existing),
        }
    }

    pub fn submissions(client: Arc<RedditApiClient>, subreddit: &str, skip_existing: bool) -> Self {
        Self::new(client, subreddit, StreamKind::Submissions, skip_existing)
    }

    pub fn comments(client: Arc<RedditApiClient>, subreddit: &str, skip_existing: bool) -> Self {
        Self::new(client, subreddit, StreamKind::Comments, skip_existing)
    }

    async fn fetch_page(&self) -> Result<Vec<ContentItem>, CoreError> {
        Ok(match self.kind {
            StreamKind::Submissions => self
                .client
                .get_new_submissions(&self.subreddit, LISTING_LIMIT)
                .await?
                .into_iter()
                .map(ContentItem::Submission)
                .collect(),
            StreamKind::Comments => self
                .client
                .get_new_comments(&self.subreddit, LISTING_LIMIT)
                .await?
                .into_iter()
                .map(ContentItem::Comment)
                .collect(),
        })
    }
}

#[async_trait]
impl ContentStream for ListingStream {
    async fn poll_next(&mut self) -> Result<Option<ContentItem>, CoreError> {
        if self.buffer.is_empty() {
            let page = self.fetch_page().await?;
            let queued = self.buffer.ingest(page);
            debug!("{}: {} new items", self.name, queued);
        }
        Ok(self.buffer.pop())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
