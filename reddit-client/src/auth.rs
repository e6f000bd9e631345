use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, HttpRequest, HttpResponse, ResourceOwnerPassword,
    ResourceOwnerUsername, TokenResponse, TokenUrl,
};
use salesbot_core::{CoreError, RedditApiError, RedditSettings};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const AUTHORIZE_URL: &str = "https://www.reddit.com/api/v1/authorize";
const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";

/// Refresh this long before the token actually expires.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Credentials of a Reddit "script" application acting as the bot account.
#[derive(Clone)]
pub struct ScriptCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
}

impl std::fmt::Debug for ScriptCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptCredentials")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

impl ScriptCredentials {
    /// Builds credentials from validated settings. Missing secrets become empty strings.
    pub fn from_settings(settings: &RedditSettings) -> Self {
        Self {
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone().unwrap_or_default(),
            username: settings.username.clone(),
            password: settings.password.clone().unwrap_or_default(),
            user_agent: settings.user_agent.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AccessToken {
    secret: String,
    expires_at: Instant,
}

impl AccessToken {
    pub fn new(secret: String, lifetime: Duration) -> Self {
        Self {
            secret,
            expires_at: Instant::now() + lifetime,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn needs_refresh(&self) -> bool {
        Instant::now() + REFRESH_MARGIN >= self.expires_at
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct ScriptAuthenticator {
    oauth: BasicClient,
    credentials: ScriptCredentials,
}

impl ScriptAuthenticator {
    pub fn new(credentials: ScriptCredentials) -> Result<Self, CoreError> {
        let auth_url = AuthUrl::new(AUTHORIZE_URL.to_string()).map_err(invalid_endpoint)?;
        let token_url = TokenUrl::new(TOKEN_URL.to_string()).map_err(invalid_endpoint)?;

        let oauth = BasicClient::new(
            ClientId::new(credentials.client_id.clone()),
            Some(ClientSecret::new(credentials.client_secret.clone())),
            auth_url,
            Some(token_url),
        );

        Ok(Self { oauth, credentials })
    }

    #[cfg(test)]
    fn username(&self) -> &str {
        &self.credentials.username
    }

    /// Exchanges the account password for a bearer token.
    pub async fn fetch_token(&self, http: &reqwest::Client) -> Result<AccessToken, CoreError> {
        debug!("Requesting access token for /u/{}", self.credentials.username);

        let username = ResourceOwnerUsername::new(self.credentials.username.clone());
        let password = ResourceOwnerPassword::new(self.credentials.password.clone());
        let response = self
            .oauth
            .exchange_password(&username, &password)
            .request_async(|request| send_token_request(http, request))
            .await
            .map_err(|e| {
                CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                    reason: e.to_string(),
                })
            })?;

        let lifetime = response.expires_in().unwrap_or(DEFAULT_TOKEN_LIFETIME);
        info!(
            "Authenticated as /u/{} (token valid for {:?})",
            self.credentials.username, lifetime
        );
        Ok(AccessToken::new(
            response.access_token().secret().clone(),
            lifetime,
        ))
    }
}

fn invalid_endpoint(e: url::ParseError) -> CoreError {
    CoreError::Internal {
        message: format!("invalid OAuth endpoint: {e}"),
    }
}

// Routes the token exchange through our client so Reddit sees the bot's user agent.
async fn send_token_request(
    http: &reqwest::Client,
    request: HttpRequest,
) -> Result<HttpResponse, reqwest::Error> {
    let response = http
        .request(request.method, request.url.as_str())
        .headers(request.headers)
        .body(request.body)
        .send()
        .await?;

    let status_code = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?.to_vec();

    Ok(HttpResponse {
        status_code,
        headers,
        body,
    })
}
