//! Configuration loading and management

use anyhow::{Context, Result, bail};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tikdog_adapters::{
    media::MediaConfig,
    telegram::{DEFAULT_API_BASE, TelegramConfig},
    tiktok::{DEFAULT_BASE_URL, DEFAULT_USER_AGENT, TikTokConfig},
};
use tikdog_domain::usecases::{LinkerConfig, ReconcileConfig, SyncConfig};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub tiktok: TikTokSection,

    #[serde(default)]
    pub telegram: TelegramSection,

    #[serde(default)]
    pub media: MediaSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TikTokSection {
    #[serde(default)]
    pub username: String,

    /// Resolved from the profile page when empty
    #[serde(default)]
    pub sec_uid: String,

    #[serde(default = "default_cookie_env")]
    pub cookie_env: String,

    #[serde(default = "default_device_id_env")]
    pub device_id_env: String,

    #[serde(default = "default_tiktok_base_url")]
    pub base_url: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,

    #[serde(default = "default_media_retry_limit")]
    pub media_retry_limit: u32,

    #[serde(default = "default_media_retry_delay_ms")]
    pub media_retry_delay_ms: u64,

    #[serde(default = "default_tiktok_timeout")]
    pub timeout_secs: u64,

    /// Known item downloaded once at startup to verify the session
    #[serde(default)]
    pub probe_item_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramSection {
    #[serde(default = "default_bot_token_env")]
    pub bot_token_env: String,

    #[serde(default)]
    pub channel_id: String,

    #[serde(default)]
    pub scratch_chat_id: String,

    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,

    #[serde(default = "default_allowed_empty_gap")]
    pub allowed_empty_gap: u32,

    #[serde(default = "default_telegram_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaSection {
    #[serde(default = "default_min_bytes")]
    pub min_bytes: u64,

    /// Empty disables audio tagging
    #[serde(default = "default_ffmpeg_command")]
    pub ffmpeg_command: String,
}

fn default_poll_interval() -> u64 {
    1800
}

fn default_media_dir() -> PathBuf {
    PathBuf::from("./tmp")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cookie_env() -> String {
    "TT_COOKIE".to_string()
}

fn default_device_id_env() -> String {
    "TT_DEVICE_ID".to_string()
}

fn default_tiktok_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_page_size() -> u32 {
    25
}

fn default_page_delay_ms() -> u64 {
    1500
}

fn default_media_retry_limit() -> u32 {
    3
}

fn default_media_retry_delay_ms() -> u64 {
    2000
}

fn default_tiktok_timeout() -> u64 {
    30
}

fn default_bot_token_env() -> String {
    "TG_BOT_TOKEN".to_string()
}

fn default_telegram_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_allowed_empty_gap() -> u32 {
    30
}

fn default_telegram_timeout() -> u64 {
    60
}

fn default_min_bytes() -> u64 {
    1024
}

fn default_ffmpeg_command() -> String {
    "ffmpeg".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            media_dir: default_media_dir(),
            log_level: default_log_level(),
        }
    }
}

impl Default for TikTokSection {
    fn default() -> Self {
        Self {
            username: String::new(),
            sec_uid: String::new(),
            cookie_env: default_cookie_env(),
            device_id_env: default_device_id_env(),
            base_url: default_tiktok_base_url(),
            user_agent: default_user_agent(),
            page_size: default_page_size(),
            page_delay_ms: default_page_delay_ms(),
            media_retry_limit: default_media_retry_limit(),
            media_retry_delay_ms: default_media_retry_delay_ms(),
            timeout_secs: default_tiktok_timeout(),
            probe_item_id: None,
        }
    }
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            bot_token_env: default_bot_token_env(),
            channel_id: String::new(),
            scratch_chat_id: String::new(),
            api_base: default_telegram_api_base(),
            allowed_empty_gap: default_allowed_empty_gap(),
            timeout_secs: default_telegram_timeout(),
        }
    }
}

impl Default for MediaSection {
    fn default() -> Self {
        Self {
            min_bytes: default_min_bytes(),
            ffmpeg_command: default_ffmpeg_command(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        let default_path = PathBuf::from("./config.toml");
        let path = config_path.unwrap_or(&default_path);

        if path.exists() {
            builder = builder.add_source(config::File::from(path));
        } else if config_path.is_some() {
            bail!("Config file not found: {}", path.display());
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TIKDOG")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Names of required keys that are empty
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = vec![];
        if self.tiktok.username.trim().is_empty() {
            missing.push("tiktok.username");
        }
        if self.telegram.channel_id.trim().is_empty() {
            missing.push("telegram.channel_id");
        }
        if self.telegram.scratch_chat_id.trim().is_empty() {
            missing.push("telegram.scratch_chat_id");
        }
        missing
    }

    pub fn validate(&self) -> Result<()> {
        let missing = self.missing_required();
        if !missing.is_empty() {
            bail!("Missing required configuration: {}", missing.join(", "));
        }
        Ok(())
    }

    pub fn sync_config(&self, dry_run: bool) -> SyncConfig {
        SyncConfig {
            poll_interval: Duration::from_secs(self.general.poll_interval_secs),
            dry_run,
            reconcile: ReconcileConfig {
                page_delay: Duration::from_millis(self.tiktok.page_delay_ms),
                media_retry_limit: self.tiktok.media_retry_limit,
                media_retry_delay: Duration::from_millis(self.tiktok.media_retry_delay_ms),
            },
            linker: LinkerConfig {
                allowed_empty_gap: self.telegram.allowed_empty_gap,
            },
        }
    }

    pub fn tiktok_config(&self) -> TikTokConfig {
        TikTokConfig {
            base_url: self.tiktok.base_url.clone(),
            user_agent: self.tiktok.user_agent.clone(),
            page_size: self.tiktok.page_size,
            timeout: Duration::from_secs(self.tiktok.timeout_secs),
        }
    }

    pub fn telegram_config(&self) -> TelegramConfig {
        TelegramConfig {
            api_base: self.telegram.api_base.clone(),
            timeout: Duration::from_secs(self.telegram.timeout_secs),
            ..TelegramConfig::new(
                self.telegram.channel_id.clone(),
                self.telegram.scratch_chat_id.clone(),
            )
        }
    }

    pub fn media_config(&self) -> MediaConfig {
        MediaConfig {
            dir: self.general.media_dir.clone(),
            min_bytes: self.media.min_bytes,
            user_agent: self.tiktok.user_agent.clone(),
            ..MediaConfig::default()
        }
    }

    /// Generate example configuration as TOML string
    pub fn example_toml() -> String {
        format!(
            r#"# tikdog configuration
#
# Secrets are read from the environment variables named below.

[general]
poll_interval_secs = 1800
media_dir = "./tmp"
log_level = "info"

[tiktok]
username = "your_username"
# Resolved from the profile page when empty
sec_uid = ""
cookie_env = "TT_COOKIE"
device_id_env = "TT_DEVICE_ID"
base_url = "{base_url}"
user_agent = "{user_agent}"
page_size = 25
page_delay_ms = 1500
media_retry_limit = 3
media_retry_delay_ms = 2000
timeout_secs = 30
# Download this item at startup to verify the session
# probe_item_id = 7455398333754952967

[telegram]
bot_token_env = "TG_BOT_TOKEN"
channel_id = "@your_channel"
# Private chat the bot can write to, used to read channel messages
scratch_chat_id = "123456789"
api_base = "{api_base}"
allowed_empty_gap = 30
timeout_secs = 60

[media]
min_bytes = 1024
# Empty disables audio tagging
ffmpeg_command = "ffmpeg"
"#,
            base_url = DEFAULT_BASE_URL,
            user_agent = DEFAULT_USER_AGENT,
            api_base = DEFAULT_API_BASE,
        )
    }
}

/// Read a secret from the environment variable named in the config
pub(crate) fn load_secret(env_var: &str, purpose: &str) -> Result<SecretString> {
    if env_var.trim().is_empty() {
        bail!("No env var configured for {}", purpose);
    }

    let value = std::env::var(env_var)
        .with_context(|| format!("Missing env var {} for {}", env_var, purpose))?;

    if value.trim().is_empty() {
        bail!("Env var {} is empty for {}", env_var, purpose);
    }

    Ok(SecretString::new(value.into()))
}
