use anyhow::Context;
use bot_service::StreamPoller;
use reddit_client::{ListingStream, RedditApiClient, ScriptCredentials};
use salesbot_core::{
    BotConfig, ContentStream, VendorRegistry, CONFIG_PATH_VAR, DEFAULT_CONFIG_PATH,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "salesbot=debug,bot_service=debug,reddit_client=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Starting TeaSalesBot");

    let config_path =
        std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = BotConfig::load(&config_path)
        .with_context(|| format!("failed to load configuration from {config_path}"))?;
    let settings = &config.bot;

    let registry = VendorRegistry::load(&settings.vendors_path).with_context(|| {
        format!(
            "failed to load vendors from {}",
            settings.vendors_path.display()
        )
    })?;
    if registry.is_empty() {
        tracing::warn!("Vendor list is empty, nothing will be matched");
    } else {
        tracing::info!("Loaded {} vendors", registry.len());
    }

    let client = Arc::new(
        RedditApiClient::new(ScriptCredentials::from_settings(&config.reddit))
            .context("failed to create Reddit client")?,
    );
    client
        .authenticate()
        .await
        .context("failed to authenticate with Reddit")?;
    let identity = client
        .get_user_info()
        .await
        .context("failed to read the bot account")?
        .name;

    let streams: Vec<Box<dyn ContentStream>> = vec![
        Box::new(ListingStream::submissions(
            client.clone(),
            &settings.monitor_subreddit,
            settings.skip_existing,
        )),
        Box::new(ListingStream::comments(
            client.clone(),
            &settings.monitor_subreddit,
            settings.skip_existing,
        )),
    ];

    let mut poller = StreamPoller::new(streams, client, Arc::new(registry), identity, settings);
    poller
        .run()
        .await
        .context("stopped polling after an unrecoverable stream error")
}
