use chrono::{DateTime, Utc};
use std::fmt;

const SUBMISSION_PREFIX: &str = "t3_";
const COMMENT_PREFIX: &str = "t1_";

/// Reference to a node in a thread: the submission itself or one of its comments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ThreadRef {
    Submission(String),
    Comment(String),
}

impl ThreadRef {
    /// Parses a Reddit fullname (`t3_abc` or `t1_def`).
    pub fn from_fullname(fullname: &str) -> Option<Self> {
        if let Some(id) = fullname.strip_prefix(SUBMISSION_PREFIX) {
            (!id.is_empty()).then(|| ThreadRef::Submission(id.to_string()))
        } else if let Some(id) = fullname.strip_prefix(COMMENT_PREFIX) {
            (!id.is_empty()).then(|| ThreadRef::Comment(id.to_string()))
        } else {
            None
        }
    }

    pub fn fullname(&self) -> String {
        match self {
            ThreadRef::Submission(id) => format!("{SUBMISSION_PREFIX}{id}"),
            ThreadRef::Comment(id) => format!("{COMMENT_PREFIX}{id}"),
        }
    }
}

impl fmt::Display for ThreadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fullname())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub id: String,
    /// `None` when the account was deleted.
    pub author: Option<String>,
    pub title: String,
    pub body: String,
    pub category_label: Option<String>,
    /// Absolute URL of the submission's comment page, ending in `/`.
    pub permalink: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub id: String,
    pub author: Option<String>,
    pub body: String,
    pub parent_ref: ThreadRef,
    /// Id of the submission the comment belongs to, without the `t3_` prefix.
    pub submission_ref: String,
    pub submission_permalink: String,
}

/// One item yielded by a content stream. A snapshot of remote state at fetch time.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentItem {
    Submission(Submission),
    Comment(Comment),
}

impl ContentItem {
    pub fn id(&self) -> &str {
        match self {
            ContentItem::Submission(s) => &s.id,
            ContentItem::Comment(c) => &c.id,
        }
    }

    pub fn author(&self) -> Option<&str> {
        match self {
            ContentItem::Submission(s) => s.author.as_deref(),
            ContentItem::Comment(c) => c.author.as_deref(),
        }
    }

    pub fn thread_ref(&self) -> ThreadRef {
        match self {
            ContentItem::Submission(s) => ThreadRef::Submission(s.id.clone()),
            ContentItem::Comment(c) => ThreadRef::Comment(c.id.clone()),
        }
    }

    /// Permanent reference: the submission permalink, plus the comment id for comments.
    pub fn permalink(&self) -> String {
        match self {
            ContentItem::Submission(s) => s.permalink.clone(),
            ContentItem::Comment(c) => {
                let base = c.submission_permalink.trim_end_matches('/');
                format!("{}/{}", base, c.id)
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ContentItem::Submission(_) => "submission",
            ContentItem::Comment(_) => "comment",
        }
    }
}

/// A fresh read of a single comment: where it hangs and who replied directly to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadNode {
    pub id: String,
    pub parent_ref: ThreadRef,
    /// Authors of the direct replies; `None` for deleted accounts.
    pub reply_authors: Vec<Option<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaleListing {
    pub title: String,
    pub url: String,
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSort {
    New,
}

impl SearchSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchSort::New => "new",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFilter {
    Month,
}

impl TimeFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFilter::Month => "month",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub subreddit: String,
    pub query: String,
    pub sort: SearchSort,
    pub time_filter: TimeFilter,
    pub limit: u32,
}

/// The reply as the platform recorded it.
#[derive(Debug, Clone, PartialEq)]
pub struct PostedReply {
    pub id: String,
}

/// Audit view of a successfully posted reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyRecord {
    pub reply_id: String,
    pub body: String,
    pub parent_url: String,
}

/// Usernames on the platform are case-insensitive.
pub fn same_user(author: Option<&str>, identity: &str) -> bool {
    author.is_some_and(|name| name.eq_ignore_ascii_case(identity))
}
