use crate::auth::{AccessToken, ScriptAuthenticator, ScriptCredentials};
use crate::rate_limiter::{RateLimitConfig, RateLimiter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Response};
use salesbot_core::{
    Comment, CoreError, ForumApi, PostedReply, RedditApiError, SaleListing, SearchRequest,
    Submission, ThreadNode, ThreadRef,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const REDDIT_API_BASE: &str = "https://oauth.reddit.com";
const REDDIT_WEB_BASE: &str = "https://www.reddit.com";
const DELETED_AUTHOR: &str = "[deleted]";
const MAX_COMMENT_LIMIT: &str = "500";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListing<T> {
    pub kind: String,
    pub data: RedditListingData<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingData<T> {
    pub children: Vec<RedditListingChild<T>>,
    pub after: Option<String>,
    pub before: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingChild<T> {
    pub kind: String,
    pub data: T,
}

/// A `t3` thing: a submission (link or self post).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditLinkData {
    pub id: String,
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    pub author: Option<String>,
    pub link_flair_text: Option<String>,
    pub url: String,
    pub permalink: String,
    pub created_utc: f64,
}

/// A `t1` thing. `replies` is `""` when empty and a listing otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditCommentData {
    pub id: String,
    pub name: String,
    pub author: Option<String>,
    #[serde(default)]
    pub body: String,
    pub parent_id: String,
    pub link_id: String,
    pub link_permalink: Option<String>,
    pub permalink: Option<String>,
    #[serde(default)]
    pub replies: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditUserData {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    json: ApiEnvelopeBody,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelopeBody {
    #[serde(default)]
    errors: Vec<Vec<serde_json::Value>>,
    data: Option<ApiThings>,
}

#[derive(Debug, Deserialize)]
struct ApiThings {
    things: Vec<RedditListingChild<serde_json::Value>>,
}

/// Authenticated client for the parts of the Reddit API the bot uses.
#[derive(Debug)]
pub struct RedditApiClient {
    http_client: Client,
    rate_limiter: RateLimiter,
    authenticator: ScriptAuthenticator,
    token: Mutex<Option<AccessToken>>,
    api_base: String,
}

impl RedditApiClient {
    pub fn new(credentials: ScriptCredentials) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent(credentials.user_agent.as_str())
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            rate_limiter: RateLimiter::new(RateLimitConfig::reddit_oauth()),
            authenticator: ScriptAuthenticator::new(credentials)?,
            token: Mutex::new(None),
            api_base: REDDIT_API_BASE.to_string(),
        })
    }

    /// Fetches a token now so credential problems surface at startup.
    pub async fn authenticate(&self) -> Result<(), CoreError> {
        let token = self.authenticator.fetch_token(&self.http_client).await?;
        *self.token.lock().await = Some(token);
        Ok(())
    }

    async fn bearer(&self) -> Result<String, CoreError> {
        let mut guard = self.token.lock().await;
        match guard.as_ref() {
            Some(token) if !token.needs_refresh() => Ok(token.secret().to_string()),
            _ => {
                let token = self.authenticator.fetch_token(&self.http_client).await?;
                let secret = token.secret().to_string();
                *guard = Some(token);
                Ok(secret)
            }
        }
    }

    pub async fn make_request(
        &self,
        method: Method,
        endpoint: &str,
        query_params: Option<&[(&str, &str)]>,
        form: Option<&[(&str, &str)]>,
    ) -> Result<Response, CoreError> {
        let url = format!("{}{}", self.api_base, endpoint);
        let access_token = self.bearer().await?;

        let waited = self.rate_limiter.acquire_permit().await;
        if !waited.is_zero() {
            debug!("Waited {:?} for rate limit permit on {}", waited, endpoint);
        }

        let mut request_builder = self
            .http_client
            .request(method.clone(), &url)
            .bearer_auth(access_token);

        if let Some(params) = query_params {
            request_builder = request_builder.query(params);
        }
        if let Some(fields) = form {
            request_builder = request_builder.form(fields);
        }

        debug!("Making Reddit API request: {} {}", method, endpoint);
        let response = match request_builder.send().await {
            Ok(response) => response,
            Err(e) => {
                error!("Network error for {} {}: {}", method, endpoint, e);
                if e.is_timeout() {
                    return Err(CoreError::RedditApi(RedditApiError::RequestTimeout));
                }
                return Err(CoreError::Network(e));
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        error!("Request failed with status: {} for {}", status, endpoint);
        let error = match status.as_u16() {
            429 => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(60);
                warn!("Rate limited, retry after {} seconds", retry_after);
                RedditApiError::RateLimitExceeded { retry_after }
            }
            401 => {
                // Force a fresh token on the next request.
                *self.token.lock().await = None;
                RedditApiError::InvalidToken
            }
            403 => RedditApiError::Forbidden {
                resource: endpoint.to_string(),
            },
            404 => RedditApiError::InvalidResponse {
                details: format!("Resource not found: {}", endpoint),
            },
            code => RedditApiError::ServerError { status_code: code },
        };
        Err(CoreError::RedditApi(error))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
    ) -> Result<T, CoreError> {
        let response = self
            .make_request(Method::GET, endpoint, Some(query_params), None)
            .await?;
        response
            .json()
            .await
            .map_err(|e| body_read_error(endpoint, e))
    }

    pub async fn get_user_info(&self) -> Result<RedditUserData, CoreError> {
        let user_data: RedditUserData = self.get_json("/api/v1/me", &[]).await?;
        debug!("Retrieved user info for: {}", user_data.name);
        Ok(user_data)
    }

    pub async fn get_new_submissions(
        &self,
        subreddit: &str,
        limit: u32,
    ) -> Result<Vec<Submission>, CoreError> {
        let endpoint = format!("/r/{}/new", subreddit);
        let limit = limit.to_string();
        let listing: RedditListing<RedditLinkData> = self
            .get_json(&endpoint, &[("limit", limit.as_str()), ("raw_json", "1")])
            .await?;
        debug!(
            "Retrieved {} submissions from r/{}",
            listing.data.children.len(),
            subreddit
        );
        Ok(listing
            .data
            .children
            .into_iter()
            .map(|child| child.data.into())
            .collect())
    }

    pub async fn get_new_comments(
        &self,
        subreddit: &str,
        limit: u32,
    ) -> Result<Vec<Comment>, CoreError> {
        let endpoint = format!("/r/{}/comments", subreddit);
        let limit = limit.to_string();
        let listing: RedditListing<RedditCommentData> = self
            .get_json(&endpoint, &[("limit", limit.as_str()), ("raw_json", "1")])
            .await?;
        debug!(
            "Retrieved {} comments from r/{}",
            listing.data.children.len(),
            subreddit
        );
        listing
            .data
            .children
            .into_iter()
            .map(|child| comment_from_data(child.data))
            .collect()
    }

    /// `/comments/...` answers with a pair of listings: the submission, then the comments.
    async fn get_comment_tree(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
    ) -> Result<Vec<RedditCommentData>, CoreError> {
        let (_, comments): (
            RedditListing<serde_json::Value>,
            RedditListing<serde_json::Value>,
        ) = self.get_json(endpoint, query_params).await?;
        Ok(comment_children(comments.data.children))
    }
}

/// Only a body that arrived whole but does not parse is the platform's fault.
fn body_read_error(endpoint: &str, e: reqwest::Error) -> CoreError {
    let unparseable = std::error::Error::source(&e).is_some_and(|s| s.is::<serde_json::Error>());
    if e.is_timeout() {
        warn!("Timed out reading response from {}", endpoint);
        CoreError::RedditApi(RedditApiError::RequestTimeout)
    } else if unparseable {
        error!("Failed to parse response from {}: {}", endpoint, e);
        CoreError::RedditApi(RedditApiError::InvalidResponse {
            details: format!("Failed to parse response from {}", endpoint),
        })
    } else {
        warn!("Failed to read response from {}: {}", endpoint, e);
        CoreError::Network(e)
    }
}

fn comment_children(
    children: Vec<RedditListingChild<serde_json::Value>>,
) -> Vec<RedditCommentData> {
    children
        .into_iter()
        .filter(|child| child.kind == "t1")
        .filter_map(|child| match serde_json::from_value(child.data) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!("Skipping malformed comment in listing: {}", e);
                None
            }
        })
        .collect()
}

fn author_from(raw: Option<String>) -> Option<String> {
    raw.filter(|name| name != DELETED_AUTHOR)
}

fn absolute_permalink(permalink: &str) -> String {
    if permalink.starts_with("http") {
        permalink.to_string()
    } else {
        format!("{}{}", REDDIT_WEB_BASE, permalink)
    }
}

fn parse_thread_ref(fullname: &str) -> Result<ThreadRef, CoreError> {
    ThreadRef::from_fullname(fullname).ok_or_else(|| {
        CoreError::RedditApi(RedditApiError::InvalidResponse {
            details: format!("unexpected parent reference {}", fullname),
        })
    })
}

/// Comment permalinks end in `<comment id>/`; the submission permalink is the prefix.
fn submission_permalink(data: &RedditCommentData) -> String {
    if let Some(link) = &data.link_permalink {
        return absolute_permalink(link);
    }
    let comment_link = data.permalink.as_deref().unwrap_or_default();
    let trimmed = comment_link.trim_end_matches('/');
    let base = trimmed.strip_suffix(data.id.as_str()).unwrap_or(trimmed);
    absolute_permalink(base)
}

fn comment_from_data(data: RedditCommentData) -> Result<Comment, CoreError> {
    let parent_ref = parse_thread_ref(&data.parent_id)?;
    let submission_ref = match parse_thread_ref(&data.link_id)? {
        ThreadRef::Submission(id) => id,
        ThreadRef::Comment(_) => {
            return Err(CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("link_id {} is not a submission", data.link_id),
            }))
        }
    };
    let submission_permalink = submission_permalink(&data);

    Ok(Comment {
        id: data.id,
        author: author_from(data.author),
        body: data.body,
        parent_ref,
        submission_ref,
        submission_permalink,
    })
}

/// Authors of the comments directly under this one.
fn direct_reply_authors(replies: &serde_json::Value) -> Vec<Option<String>> {
    let children = replies
        .pointer("/data/children")
        .and_then(|children| children.as_array());

    children
        .into_iter()
        .flatten()
        .filter(|child| child.get("kind").and_then(|kind| kind.as_str()) == Some("t1"))
        .map(|child| {
            child
                .pointer("/data/author")
                .and_then(|author| author.as_str())
                .map(str::to_string)
        })
        .map(author_from)
        .collect()
}

fn listing_from_link(data: RedditLinkData) -> SaleListing {
    SaleListing {
        title: data.title,
        url: data.url,
        posted_at: DateTime::<Utc>::from_timestamp(data.created_utc as i64, 0)
            .unwrap_or_default(),
    }
}

/// Reads "try again in 9 minutes." style hints; defaults to one minute.
fn ratelimit_delay_secs(message: &str) -> u64 {
    let words: Vec<&str> = message.split_whitespace().collect();
    words
        .windows(2)
        .find_map(|pair| {
            let amount = pair[0].parse::<u64>().ok()?;
            if pair[1].starts_with("minute") {
                Some(amount * 60)
            } else if pair[1].starts_with("second") {
                Some(amount)
            } else {
                None
            }
        })
        .unwrap_or(60)
}

fn reply_from_envelope(envelope: ApiEnvelope) -> Result<PostedReply, CoreError> {
    if let Some(first) = envelope.json.errors.first() {
        let field = |i: usize| {
            first
                .get(i)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let (error_type, message) = (field(0), field(1));
        if error_type == "RATELIMIT" {
            warn!("Reply rejected by rate limit: {}", message);
            return Err(CoreError::RedditApi(RedditApiError::RateLimitExceeded {
                retry_after: ratelimit_delay_secs(&message),
            }));
        }
        return Err(CoreError::RedditApi(RedditApiError::Rejected {
            error_type,
            message,
        }));
    }

    let thing = envelope
        .json
        .data
        .and_then(|data| data.things.into_iter().next())
        .ok_or_else(|| {
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: "reply response carried no thing".to_string(),
            })
        })?;

    let id = thing
        .data
        .get("id")
        .and_then(|id| id.as_str())
        .ok_or_else(|| {
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: "reply response carried no id".to_string(),
            })
        })?
        .to_string();

    Ok(PostedReply { id })
}

#[async_trait]
impl ForumApi for RedditApiClient {
    async fn submission(&self, id: &str) -> Result<Submission, CoreError> {
        let fullname = ThreadRef::Submission(id.to_string()).fullname();
        let listing: RedditListing<RedditLinkData> = self
            .get_json("/api/info", &[("id", fullname.as_str()), ("raw_json", "1")])
            .await?;
        listing
            .data
            .children
            .into_iter()
            .next()
            .map(|child| child.data.into())
            .ok_or(CoreError::RedditApi(RedditApiError::ThingNotFound { fullname }))
    }

    async fn submission_reply_authors(&self, id: &str) -> Result<Vec<Option<String>>, CoreError> {
        let endpoint = format!("/comments/{}", id);
        let comments = self
            .get_comment_tree(&endpoint, &[("depth", "1"), ("limit", MAX_COMMENT_LIMIT)])
            .await?;
        Ok(comments
            .into_iter()
            .map(|comment| author_from(comment.author))
            .collect())
    }

    async fn comment_node(
        &self,
        submission_id: &str,
        comment_id: &str,
    ) -> Result<ThreadNode, CoreError> {
        let endpoint = format!("/comments/{}/_/{}", submission_id, comment_id);
        let comments = self
            .get_comment_tree(
                &endpoint,
                &[
                    ("context", "0"),
                    ("depth", "2"),
                    ("limit", MAX_COMMENT_LIMIT),
                ],
            )
            .await?;

        let comment = comments
            .into_iter()
            .find(|comment| comment.id == comment_id)
            .ok_or_else(|| {
                CoreError::RedditApi(RedditApiError::ThingNotFound {
                    fullname: ThreadRef::Comment(comment_id.to_string()).fullname(),
                })
            })?;

        Ok(ThreadNode {
            parent_ref: parse_thread_ref(&comment.parent_id)?,
            reply_authors: direct_reply_authors(&comment.replies),
            id: comment.id,
        })
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SaleListing>, CoreError> {
        let endpoint = format!("/r/{}/search", request.subreddit);
        let limit = request.limit.to_string();
        let listing: RedditListing<RedditLinkData> = self
            .get_json(
                &endpoint,
                &[
                    ("q", request.query.as_str()),
                    ("restrict_sr", "on"),
                    ("sort", request.sort.as_str()),
                    ("t", request.time_filter.as_str()),
                    ("limit", limit.as_str()),
                    ("raw_json", "1"),
                ],
            )
            .await?;

        info!(
            "Search in r/{} returned {} results",
            request.subreddit,
            listing.data.children.len()
        );
        Ok(listing
            .data
            .children
            .into_iter()
            .filter(|child| child.kind == "t3")
            .map(|child| listing_from_link(child.data))
            .collect())
    }

    async fn reply(&self, parent: &ThreadRef, body: &str) -> Result<PostedReply, CoreError> {
        let fullname = parent.fullname();
        let response = self
            .make_request(
                Method::POST,
                "/api/comment",
                None,
                Some(&[
                    ("api_type", "json"),
                    ("thing_id", fullname.as_str()),
                    ("text", body),
                ]),
            )
            .await?;

        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| body_read_error("/api/comment", e))?;
        let reply = reply_from_envelope(envelope)?;
        info!("Posted reply {} to {}", reply.id, fullname);
        Ok(reply)
    }
}

impl From<RedditLinkData> for Submission {
    fn from(data: RedditLinkData) -> Self {
        Self {
            id: data.id,
            author: author_from(data.author),
            title: data.title,
            body: data.selftext,
            category_label: data.link_flair_text.filter(|label| !label.is_empty()),
            permalink: absolute_permalink(&data.permalink),
        }
    }
}
