use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_VAR: &str = "SALESBOT_CONFIG";
pub const CLIENT_SECRET_VAR: &str = "SALESBOT_CLIENT_SECRET";
pub const PASSWORD_VAR: &str = "SALESBOT_PASSWORD";
pub const DEFAULT_CONFIG_PATH: &str = "salesbot.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub reddit: RedditSettings,
    #[serde(default)]
    pub bot: BotSettings,
}

/// Script-app credentials for the bot account.
#[derive(Clone, Deserialize)]
pub struct RedditSettings {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl std::fmt::Debug for RedditSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditSettings")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    /// Forum watched for vendor mentions.
    pub monitor_subreddit: String,
    /// Forum searched for sale announcements.
    pub sales_subreddit: String,
    pub excluded_flairs: BTreeSet<String>,
    pub vendors_path: PathBuf,
    pub audit_dir: PathBuf,
    pub footer: String,
    pub max_reply_attempts: u32,
    pub rate_limit_cooldown_secs: u64,
    pub idle_delay_secs: u64,
    pub max_idle_delay_secs: u64,
    pub skip_existing: bool,
    pub scan_submission_body: bool,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            monitor_subreddit: "tea".to_string(),
            sales_subreddit: "teasales".to_string(),
            excluded_flairs: ["Discussion", "Article", "Reference", "Marketing Monday", "Meta"]
                .into_iter()
                .map(String::from)
                .collect(),
            vendors_path: PathBuf::from("vendors.json"),
            audit_dir: PathBuf::from("tmp"),
            footer: "^(TeaSalesBot made with 🍵 and ❤️ by) ^[/u/taylorkline](/user/taylorkline)"
                .to_string(),
            max_reply_attempts: 20,
            rate_limit_cooldown_secs: 120,
            idle_delay_secs: 1,
            max_idle_delay_secs: 16,
            skip_existing: false,
            scan_submission_body: false,
        }
    }
}

impl BotSettings {
    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_secs(self.idle_delay_secs)
    }

    pub fn max_idle_delay(&self) -> Duration {
        Duration::from_secs(self.max_idle_delay_secs)
    }
}

fn default_user_agent() -> String {
    format!("salesbot/{}", env!("CARGO_PKG_VERSION"))
}

impl BotConfig {
    /// Reads the TOML file, fills secrets from the environment and validates the result.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        let mut config = Self::from_toml_str(&contents)?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup(CLIENT_SECRET_VAR) {
            self.reddit.client_secret = Some(secret);
        }
        if let Some(password) = lookup(PASSWORD_VAR) {
            self.reddit.password = Some(password);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("reddit.client_id", Some(self.reddit.client_id.as_str())),
            ("reddit.client_secret", self.reddit.client_secret.as_deref()),
            ("reddit.username", Some(self.reddit.username.as_str())),
            ("reddit.password", self.reddit.password.as_deref()),
        ];
        for (field, value) in required {
            if value.map_or(true, |v| v.trim().is_empty()) {
                return Err(ConfigError::MissingField {
                    field: field.to_string(),
                });
            }
        }

        for (field, value) in [
            ("bot.monitor_subreddit", &self.bot.monitor_subreddit),
            ("bot.sales_subreddit", &self.bot.sales_subreddit),
        ] {
            if value.trim().is_empty() || value.contains('/') {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.clone(),
                });
            }
        }

        if self.bot.max_reply_attempts == 0 {
            return Err(ConfigError::ValidationFailed {
                reason: "bot.max_reply_attempts must be at least 1".to_string(),
            });
        }
        if self.bot.max_idle_delay_secs < self.bot.idle_delay_secs {
            return Err(ConfigError::ValidationFailed {
                reason: "bot.max_idle_delay_secs must not be below bot.idle_delay_secs"
                    .to_string(),
            });
        }
        Ok(())
    }
}
