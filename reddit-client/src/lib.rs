pub mod api;
pub mod auth;
pub mod rate_limiter;
pub mod stream;


pub use api::RedditApiClient;
pub use auth::{AccessToken, ScriptAuthenticator, ScriptCredentials};
pub use stream::{ListingStream, StreamKind};
