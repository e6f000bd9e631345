use crate::composer::ReplyComposer;
use crate::guard::already_replied;
use crate::responder::Responder;
use salesbot_core::{
    display_names, find_mentions, same_user, BotSettings, ContentItem, ContentStream, CoreError,
    ErrorExt, ForumApi, ReplyRecord, VendorRegistry,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info};

/// What happened to a single streamed item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    SkippedSelf,
    SkippedDeletedAuthor,
    SkippedCategory(String),
    NoMentions,
    AlreadyReplied,
    NoSales,
    Replied(ReplyRecord),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub stream: String,
    pub items: usize,
    pub replied: usize,
    pub failed: usize,
    /// The stream failed with a retryable error before it was drained.
    pub interrupted: bool,
}

/// Sleeps between rounds that produced nothing, doubling up to a ceiling.
#[derive(Debug, Clone)]
pub struct IdleBackoff {
    base: Duration,
    max: Duration,
    current: Duration,
    round_len: usize,
    quiet_passes: usize,
}

impl IdleBackoff {
    pub fn new(base: Duration, max: Duration, round_len: usize) -> Self {
        Self {
            base,
            max: max.max(base),
            current: base,
            round_len: round_len.max(1),
            quiet_passes: 0,
        }
    }

    /// Records one pass. Returns the delay to sleep once a whole round was quiet.
    pub fn observe(&mut self, items: usize) -> Option<Duration> {
        if items > 0 {
            self.quiet_passes = 0;
            self.current = self.base;
            return None;
        }

        self.quiet_passes += 1;
        if self.quiet_passes < self.round_len {
            return None;
        }

        self.quiet_passes = 0;
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        Some(delay)
    }
}

/// Alternates between content streams and answers vendor mentions.
pub struct StreamPoller<F: ForumApi + ?Sized> {
    streams: Vec<Box<dyn ContentStream>>,
    stream_index: usize,
    forum: Arc<F>,
    registry: Arc<VendorRegistry>,
    composer: ReplyComposer,
    responder: Responder,
    bot_identity: String,
    excluded_flairs: BTreeSet<String>,
    scan_submission_body: bool,
    backoff: IdleBackoff,
}

impl<F: ForumApi + ?Sized> StreamPoller<F> {
    pub fn new(
        streams: Vec<Box<dyn ContentStream>>,
        forum: Arc<F>,
        registry: Arc<VendorRegistry>,
        bot_identity: impl Into<String>,
        settings: &BotSettings,
    ) -> Self {
        let backoff = IdleBackoff::new(
            settings.idle_delay(),
            settings.max_idle_delay(),
            streams.len(),
        );
        Self {
            streams,
            stream_index: 0,
            forum,
            registry,
            composer: ReplyComposer::from_settings(settings),
            responder: Responder::from_settings(settings),
            bot_identity: bot_identity.into(),
            excluded_flairs: settings.excluded_flairs.clone(),
            scan_submission_body: settings.scan_submission_body,
            backoff,
        }
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    /// Polls forever. Returns only on a stream error that cannot be retried.
    pub async fn run(&mut self) -> Result<(), CoreError> {
        info!(
            "Watching {} streams as /u/{}",
            self.streams.len(),
            self.bot_identity
        );
        loop {
            let summary = self.run_pass().await?;
            if let Some(delay) = self.backoff.observe(summary.items) {
                debug!("Nothing new, sleeping {:?}", delay);
                sleep(delay).await;
            }
        }
    }

    /// Drains the current stream, handles each item, then moves to the next stream.
    pub async fn run_pass(&mut self) -> Result<PassSummary, CoreError> {
        if self.streams.is_empty() {
            return Ok(PassSummary::default());
        }

        let index = self.stream_index;
        let mut summary = PassSummary {
            stream: self.streams[index].name().to_string(),
            ..Default::default()
        };

        loop {
            let item = match self.streams[index].poll_next().await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(e) if e.is_retryable() => {
                    e.log_warn();
                    summary.interrupted = true;
                    break;
                }
                Err(e) => {
                    e.log_error();
                    return Err(e);
                }
            };

            summary.items += 1;
            match self.process_item(&item).await {
                Ok(ItemOutcome::Replied(_)) => summary.replied += 1,
                Ok(outcome) => debug!("{} {}: {:?}", item.kind(), item.id(), outcome),
                Err(e) => {
                    summary.failed += 1;
                    error!(
                        "Abandoned {} {} [{}]: {}",
                        item.kind(),
                        item.id(),
                        e.error_code(),
                        e
                    );
                }
            }
        }

        self.stream_index = (index + 1) % self.streams.len();
        Ok(summary)
    }

    pub async fn process_item(&self, item: &ContentItem) -> Result<ItemOutcome, CoreError> {
        let Some(author) = item.author() else {
            return Ok(ItemOutcome::SkippedDeletedAuthor);
        };
        if same_user(Some(author), &self.bot_identity) {
            return Ok(ItemOutcome::SkippedSelf);
        }

        if let Some(label) = self.category_label(item).await? {
            if self.excluded_flairs.contains(&label) {
                return Ok(ItemOutcome::SkippedCategory(label));
            }
        }

        let text = self.match_text(item);
        let mentions = find_mentions(&text, &self.registry);
        if mentions.is_empty() {
            return Ok(ItemOutcome::NoMentions);
        }
        info!(
            "{} {} by /u/{} mentions {:?}",
            item.kind(),
            item.id(),
            author,
            display_names(&mentions)
        );

        let forum = self.forum.as_ref();
        if already_replied(forum, item, &self.bot_identity).await? {
            debug!("{}: already replied in this thread", item.id());
            return Ok(ItemOutcome::AlreadyReplied);
        }

        let Some(body) = self.composer.compose_reply(forum, &mentions).await? else {
            return Ok(ItemOutcome::NoSales);
        };

        let record = self.responder.post_reply(forum, item, &body).await?;
        Ok(ItemOutcome::Replied(record))
    }

    // Comments inherit the label of their submission, read fresh.
    async fn category_label(&self, item: &ContentItem) -> Result<Option<String>, CoreError> {
        match item {
            ContentItem::Submission(s) => Ok(s.category_label.clone()),
            ContentItem::Comment(c) => Ok(self
                .forum
                .submission(&c.submission_ref)
                .await?
                .category_label),
        }
    }

    fn match_text(&self, item: &ContentItem) -> String {
        match item {
            ContentItem::Submission(s) if self.scan_submission_body => {
                format!("{}\n{}", s.title, s.body)
            }
            ContentItem::Submission(s) => s.title.clone(),
            ContentItem::Comment(c) => c.body.clone(),
        }
    }
}
