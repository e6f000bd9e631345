use crate::audit::AuditLog;
use salesbot_core::{
    BotSettings, ContentItem, CoreError, ErrorCategory, ErrorExt, ForumApi, ReplyRecord,
};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Retry behavior for posting a reply while the platform is rate limiting us.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Fixed pause between rate-limited attempts.
    pub cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            cooldown: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &BotSettings) -> Self {
        Self {
            max_attempts: settings.max_reply_attempts.max(1),
            cooldown: settings.rate_limit_cooldown(),
        }
    }
}

/// Posts replies and keeps an audit copy of each one that lands.
#[derive(Debug, Clone)]
pub struct Responder {
    policy: RetryPolicy,
    audit: AuditLog,
}

impl Responder {
    pub fn new(policy: RetryPolicy, audit: AuditLog) -> Self {
        Self { policy, audit }
    }

    pub fn from_settings(settings: &BotSettings) -> Self {
        Self::new(
            RetryPolicy::from_settings(settings),
            AuditLog::new(settings.audit_dir.clone()),
        )
    }

    /// Replies to `item` with `body`.
    ///
    /// Rate-limit rejections are retried after the cooldown until the attempt bound is
    /// reached, then the last error is returned. Every other error is returned at once.
    /// The audit file holds `body` as sent. A failure to write it is logged and does not
    /// fail the reply.
    pub async fn post_reply<F>(
        &self,
        forum: &F,
        item: &ContentItem,
        body: &str,
    ) -> Result<ReplyRecord, CoreError>
    where
        F: ForumApi + ?Sized,
    {
        let target = item.thread_ref();
        let mut attempt = 1;

        let posted = loop {
            match forum.reply(&target, body).await {
                Ok(posted) => break posted,
                Err(e) if e.category() == ErrorCategory::RateLimit => {
                    if attempt >= self.policy.max_attempts {
                        warn!(
                            "Giving up on reply to {} after {} rate-limited attempts",
                            target, attempt
                        );
                        return Err(e);
                    }
                    warn!(
                        "Rate limited replying to {} (attempt {}/{}), sleeping {:?}",
                        target, attempt, self.policy.max_attempts, self.policy.cooldown
                    );
                    sleep(self.policy.cooldown).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        let record = ReplyRecord {
            reply_id: posted.id,
            body: body.to_string(),
            parent_url: item.permalink(),
        };
        info!("Replied to {} {} as {}", item.kind(), record.parent_url, record.reply_id);

        if let Err(e) = self.audit.record(&record).await {
            e.log_warn();
        }
        Ok(record)
    }
}
