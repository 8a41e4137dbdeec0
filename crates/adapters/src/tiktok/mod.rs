//! TikTok web API adapter
//!
//! One [`TikTokClient`] holds the browser session (cookie, device id, user
//! agent) and answers proof-of-work challenges transparently. Each feed is a
//! [`TikTokFeed`] view over the shared client.

mod challenge;
mod parse;

pub use parse::parse_item;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode, header};
use secrecy::{ExposeSecret, SecretString};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tikdog_domain::{FeedError, FeedKind, FeedPage, FeedSource, SourcePost, SourcePostId};

use parse::{ItemDetailResponse, ItemListResponse};

pub const DEFAULT_BASE_URL: &str = "https://www.tiktok.com";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:142.0) Gecko/20100101 Firefox/142.0";

/// Item detail status for deleted or private posts
const STATUS_ITEM_UNAVAILABLE: i64 = 10204;

static RE_SEC_UID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""secUid":"([^"]+)""#).expect("valid secUid pattern"));

/// Connection settings for [`TikTokClient`]
#[derive(Debug, Clone)]
pub struct TikTokConfig {
    pub base_url: String,
    pub user_agent: String,
    pub page_size: u32,
    pub timeout: Duration,
}

impl Default for TikTokConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            page_size: 25,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Authenticated web session
pub struct TikTokClient {
    client: Client,
    cookie: SecretString,
    device_id: SecretString,
    config: TikTokConfig,
}

impl TikTokClient {
    pub fn new(cookie: SecretString, device_id: SecretString, config: TikTokConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            cookie,
            device_id,
            config,
        }
    }

    /// Feed view over this session
    pub fn feed(self: &Arc<Self>, kind: FeedKind, sec_uid: String) -> TikTokFeed {
        TikTokFeed {
            client: Arc::clone(self),
            kind,
            sec_uid,
        }
    }

    /// Look up the account's secUid on its public profile page
    pub async fn resolve_sec_uid(&self, username: &str) -> Result<String, FeedError> {
        let url = format!(
            "{}/@{}",
            self.config.base_url,
            username.trim_start_matches('@')
        );
        let body = self.get(&url, &[]).await?;

        let sec_uid = RE_SEC_UID
            .captures(&body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| FeedError::Api(format!("No secUid on profile page of {}", username)))?;

        tracing::info!(username = %username, "Connected to TikTok account");
        Ok(sec_uid)
    }

    /// Fetch one page of a feed. An empty cursor means the first page.
    pub async fn fetch_list(
        &self,
        kind: FeedKind,
        sec_uid: &str,
        cursor: &str,
    ) -> Result<FeedPage, FeedError> {
        let path = match kind {
            FeedKind::Liked => "/api/favorite/item_list/",
            FeedKind::Favorited => "/api/user/collect/item_list/",
        };
        let url = format!("{}{}", self.config.base_url, path);
        let cursor = if cursor.is_empty() { "0" } else { cursor };

        let body = self
            .get(
                &url,
                &[
                    ("secUid", sec_uid.to_string()),
                    ("count", self.config.page_size.to_string()),
                    ("cursor", cursor.to_string()),
                ],
            )
            .await?;

        let response: ItemListResponse = serde_json::from_str(&body).map_err(|e| {
            tracing::error!(feed = %kind, raw = %body, "Unreadable feed response");
            FeedError::Parse {
                message: e.to_string(),
                raw: body.clone(),
            }
        })?;

        if response.status_code != 0 {
            return Err(FeedError::Api(format!(
                "{} feed status {}: {}",
                kind,
                response.status_code,
                response.status_msg.unwrap_or_default()
            )));
        }

        let posts = response
            .item_list
            .iter()
            .map(parse_item)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FeedPage {
            next_cursor: response.next_cursor(),
            has_more: response.has_more,
            posts,
        })
    }

    /// Fetch a single post by id
    pub async fn fetch_item(&self, id: SourcePostId) -> Result<SourcePost, FeedError> {
        let url = format!("{}/api/item/detail/", self.config.base_url);
        let body = self.get(&url, &[("itemId", id.to_string())]).await?;

        let response: ItemDetailResponse =
            serde_json::from_str(&body).map_err(|e| FeedError::Parse {
                message: e.to_string(),
                raw: body.clone(),
            })?;

        if response.status_code == STATUS_ITEM_UNAVAILABLE {
            return Err(FeedError::NotFound(id));
        }
        if response.status_code != 0 {
            return Err(FeedError::Api(format!(
                "Item {} status {}: {}",
                id,
                response.status_code,
                response.status_msg.unwrap_or_default()
            )));
        }

        let info = response.item_info.ok_or(FeedError::NotFound(id))?;
        parse_item(&info.item_struct)
    }

    /// GET with transparent challenge handling. A second challenge fails.
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String, FeedError> {
        let body = self.send(url, query, None).await?;

        let Some(pending) = challenge::detect(&body)? else {
            return Ok(body);
        };

        tracing::info!(url = %url, "Got challenge page, solving");
        let answer = pending.answer_in_background().await?;

        let body = self.send(url, query, Some(&answer)).await?;
        if challenge::detect(&body)?.is_some() {
            return Err(FeedError::ChallengeRepeated);
        }
        Ok(body)
    }

    async fn send(
        &self,
        url: &str,
        query: &[(&str, String)],
        answer: Option<&(String, String)>,
    ) -> Result<String, FeedError> {
        let mut cookie = self.cookie.expose_secret().to_string();
        if let Some((name, value)) = answer {
            cookie.push_str(&format!("; {}={}", name, value));
        }

        let response = self
            .client
            .get(url)
            .query(&[
                ("aid", "1988"),
                ("app_name", "tiktok_web"),
                ("device_platform", "web_pc"),
                ("device_id", self.device_id.expose_secret()),
            ])
            .query(query)
            .header(header::COOKIE, cookie)
            .header(header::REFERER, format!("{}/", self.config.base_url))
            .header(header::ORIGIN, self.config.base_url.as_str())
            .send()
            .await
            .map_err(|e| FeedError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FeedError::Auth(format!(
                "HTTP {}, cookie probably expired",
                status
            )));
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FeedError::RateLimited);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::Api(format!("HTTP {}: {}", status, body)));
        }

        response
            .text()
            .await
            .map_err(|e| FeedError::Network(e.to_string()))
    }
}

/// One of the account's feeds, newest first
pub struct TikTokFeed {
    client: Arc<TikTokClient>,
    kind: FeedKind,
    sec_uid: String,
}

impl TikTokFeed {
    pub fn kind(&self) -> FeedKind {
        self.kind
    }
}

#[async_trait]
impl FeedSource for TikTokFeed {
    async fn fetch_page(&self, cursor: &str) -> Result<FeedPage, FeedError> {
        self.client.fetch_list(self.kind, &self.sec_uid, cursor).await
    }

    async fn fetch_item(&self, id: SourcePostId) -> Result<SourcePost, FeedError> {
        self.client.fetch_item(id).await
    }
}
