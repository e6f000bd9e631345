use crate::error::*;
use std::fmt;
use tracing::{error, warn};

/// How the bot treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad or missing configuration; fatal at startup.
    Config,
    /// A read or write that may succeed later; the current item is abandoned.
    TransientFetch,
    /// The platform asked us to slow down.
    RateLimit,
    /// Any other rejection from the platform; never retried.
    Platform,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Config => "config",
            ErrorCategory::TransientFetch => "transient_fetch",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Platform => "platform",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(name)
    }
}

pub trait ErrorExt {
    fn log_error(&self) -> &Self;
    fn log_warn(&self) -> &Self;
    fn category(&self) -> ErrorCategory;
    fn is_retryable(&self) -> bool;
    fn error_code(&self) -> String;
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        error!("CoreError [{}]: {}", self.error_code(), self);
        match self {
            CoreError::RedditApi(e) => {
                error!("Reddit API error details: {:?}", e);
            }
            CoreError::Config(e) => {
                error!("Configuration error details: {:?}", e);
            }
            _ => {}
        }
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("CoreError (warning) [{}]: {}", self.error_code(), self);
        self
    }

    fn category(&self) -> ErrorCategory {
        match self {
            CoreError::RedditApi(e) => e.category(),
            CoreError::Config(_) => ErrorCategory::Config,
            CoreError::Network(e) => {
                if e.is_builder() {
                    ErrorCategory::Internal
                } else if e.is_redirect() || e.is_status() {
                    ErrorCategory::Platform
                } else {
                    ErrorCategory::TransientFetch
                }
            }
            CoreError::Io(_) | CoreError::Serialization(_) | CoreError::Internal { .. } => {
                ErrorCategory::Internal
            }
            CoreError::InvalidInput { .. } => ErrorCategory::Platform,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::TransientFetch | ErrorCategory::RateLimit
        )
    }

    fn error_code(&self) -> String {
        match self {
            CoreError::RedditApi(e) => e.error_code(),
            CoreError::Config(_) => "CONFIG".to_string(),
            CoreError::Io(_) => "IO".to_string(),
            CoreError::Serialization(_) => "SERIALIZATION".to_string(),
            CoreError::Network(_) => "NETWORK".to_string(),
            CoreError::InvalidInput { .. } => "INVALID_INPUT".to_string(),
            CoreError::Internal { .. } => "INTERNAL".to_string(),
        }
    }
}

impl ErrorExt for RedditApiError {
    fn log_error(&self) -> &Self {
        error!("RedditApiError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("RedditApiError (warning): {}", self);
        self
    }

    fn category(&self) -> ErrorCategory {
        match self {
            RedditApiError::RateLimitExceeded { .. } => ErrorCategory::RateLimit,
            // The client drops a rejected token and fetches a new one on the next call.
            RedditApiError::RequestTimeout | RedditApiError::InvalidToken => {
                ErrorCategory::TransientFetch
            }
            RedditApiError::ServerError { status_code } if *status_code >= 500 => {
                ErrorCategory::TransientFetch
            }
            RedditApiError::AuthenticationFailed { .. } => ErrorCategory::Config,
            _ => ErrorCategory::Platform,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::TransientFetch | ErrorCategory::RateLimit
        )
    }

    fn error_code(&self) -> String {
        match self {
            RedditApiError::AuthenticationFailed { .. } => "REDDIT_AUTH_FAILED".to_string(),
            RedditApiError::RateLimitExceeded { .. } => "REDDIT_RATE_LIMIT".to_string(),
            RedditApiError::Forbidden { .. } => "REDDIT_FORBIDDEN".to_string(),
            RedditApiError::ThingNotFound { .. } => "REDDIT_THING_NOT_FOUND".to_string(),
            RedditApiError::InvalidToken => "REDDIT_INVALID_TOKEN".to_string(),
            RedditApiError::RequestTimeout => "REDDIT_TIMEOUT".to_string(),
            RedditApiError::InvalidResponse { .. } => "REDDIT_INVALID_RESPONSE".to_string(),
            RedditApiError::ServerError { .. } => "REDDIT_SERVER_ERROR".to_string(),
            RedditApiError::Rejected { error_type, .. } => {
                format!("REDDIT_{}", error_type.to_uppercase())
            }
        }
    }
}
