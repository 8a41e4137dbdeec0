//! Run command - rebuild, then mirror new likes and favorites forever

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tikdog_adapters::{
    ffmpeg::FfmpegTagger,
    media::HttpMediaStore,
    telegram::TelegramChannel,
    tiktok::{TikTokClient, TikTokFeed},
};
use tikdog_domain::{FeedKind, MediaStore, usecases::SyncLoop};
use tokio::time::sleep;

use crate::args::RunArgs;
use crate::config::{AppConfig, load_secret};

type AppSyncLoop = SyncLoop<TikTokFeed, TikTokFeed, TelegramChannel, HttpMediaStore>;

pub async fn execute(args: RunArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;
    config.validate()?;

    tracing::info!(
        dry_run = args.dry_run,
        once = args.once,
        username = %config.tiktok.username,
        channel = %config.telegram.channel_id,
        "Starting tikdog run"
    );

    let secrets = Secrets {
        cookie: load_secret(&config.tiktok.cookie_env, "tiktok cookie")?,
        device_id: load_secret(&config.tiktok.device_id_env, "tiktok device id")?,
        bot_token: load_secret(&config.telegram.bot_token_env, "telegram bot")?,
    };

    tokio::select! {
        result = start_and_sync(&config, &args, secrets) => result?,
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => tracing::info!("Shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C"),
            }
            tracing::info!("Shutting down gracefully");
        }
    }

    tracing::info!("tikdog run completed");
    Ok(())
}

struct Secrets {
    cookie: SecretString,
    device_id: SecretString,
    bot_token: SecretString,
}

/// Connect to both platforms, then rebuild and sync. Upstream faults during
/// startup are retried after the poll interval; only a failed download
/// probe is fatal.
async fn start_and_sync(config: &AppConfig, args: &RunArgs, secrets: Secrets) -> Result<()> {
    let retry_interval = Duration::from_secs(config.general.poll_interval_secs);

    let client = Arc::new(TikTokClient::new(
        secrets.cookie.clone(),
        secrets.device_id,
        config.tiktok_config(),
    ));

    let sec_uid = if config.tiktok.sec_uid.trim().is_empty() {
        let username = config.tiktok.username.as_str();
        let resolved = retry_until_ok("resolve secUid", retry_interval, || {
            client.resolve_sec_uid(username)
        })
        .await;
        tracing::info!(sec_uid = %resolved, "Resolved secUid");
        resolved
    } else {
        config.tiktok.sec_uid.clone()
    };

    let media = Arc::new(build_media_store(config, secrets.cookie));

    if let Some(item_id) = config.tiktok.probe_item_id {
        probe_download(&client, media.as_ref(), item_id).await?;
    }

    let channel = TelegramChannel::new(secrets.bot_token, config.telegram_config());
    let bot = retry_until_ok("connect to Telegram", retry_interval, || channel.connect()).await;
    tracing::info!(bot = %bot, "Connected to Telegram");

    let mut sync: AppSyncLoop = SyncLoop::new(
        Arc::new(client.feed(FeedKind::Liked, sec_uid.clone())),
        Arc::new(client.feed(FeedKind::Favorited, sec_uid)),
        Arc::new(channel),
        media,
        config.sync_config(args.dry_run),
    );

    if args.once {
        tracing::info!("Running single rebuild and posting pass");
        sync.rebuild().await.context("Rebuild failed")?;
        let report = sync.post_pending().await.context("Posting failed")?;
        tracing::info!(
            posted = report.posted,
            skipped = report.skipped,
            pending = report.pending,
            "Pass complete"
        );
        return Ok(());
    }

    sync.run_forever().await;
    Ok(())
}

/// Repeat `attempt` until it succeeds, sleeping `interval` after each fault
async fn retry_until_ok<T, E, F, Fut>(step: &str, interval: Duration, mut attempt: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    loop {
        match attempt().await {
            Ok(value) => return value,
            Err(e) => {
                tracing::error!(
                    step,
                    error = %e,
                    retry_in_secs = interval.as_secs(),
                    "Startup step failed, retrying"
                );
                sleep(interval).await;
            }
        }
    }
}

fn build_media_store(config: &AppConfig, cookie: SecretString) -> HttpMediaStore {
    let store = HttpMediaStore::new(config.media_config()).with_cookie(cookie);

    let command = config.media.ffmpeg_command.trim();
    if command.is_empty() {
        tracing::info!("Audio tagging disabled");
        store
    } else {
        store.with_tagger(Arc::new(FfmpegTagger::new(command)))
    }
}

/// Download one known item to prove the session can fetch media
async fn probe_download(
    client: &TikTokClient,
    media: &HttpMediaStore,
    item_id: u64,
) -> Result<()> {
    tracing::info!(item_id, "Probing media download");

    let post = client.fetch_item(item_id).await.with_context(|| {
        format!(
            "Probe item {} could not be fetched, the device id is probably invalid",
            item_id
        )
    })?;

    media.fetch(&post.media).await.with_context(|| {
        format!(
            "Probe item {} could not be downloaded, the device id is probably invalid",
            item_id
        )
    })?;
    media.delete(&post.media).await;

    tracing::info!(item_id, "Probe download succeeded");
    Ok(())
}
