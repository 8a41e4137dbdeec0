//! Telegram Bot API channel adapter
//!
//! Bots cannot read channel history directly. A message is read by
//! forwarding it into a private scratch chat, taking the caption from the
//! forwarded copy, and deleting the copy again.

pub mod markdown;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tikdog_domain::{Channel, ChannelError, ChannelMessage, LocalMedia, MediaKind, MessageId};

use markdown::MessageEntity;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Largest number of items in one album
const MAX_ALBUM: usize = 10;

/// Settings for [`TelegramChannel`]
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_base: String,
    /// Target channel, numeric id or `@username`
    pub channel_id: String,
    /// Private chat the bot can post in, used to read channel messages
    pub scratch_chat_id: String,
    pub timeout: Duration,
    /// Retries of a call answered with 429
    pub max_retries: u32,
}

impl TelegramConfig {
    pub fn new(channel_id: impl Into<String>, scratch_chat_id: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            channel_id: channel_id.into(),
            scratch_chat_id: scratch_chat_id.into(),
            timeout: Duration::from_secs(60),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<u16>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: MessageId,
    text: Option<String>,
    caption: Option<String>,
    #[serde(default)]
    entities: Vec<MessageEntity>,
    #[serde(default)]
    caption_entities: Vec<MessageEntity>,
}

impl Message {
    /// Markdown view of the text or caption
    fn markdown(&self) -> Option<String> {
        match (&self.caption, &self.text) {
            (Some(caption), _) => Some(markdown::from_entities(caption, &self.caption_entities)),
            (None, Some(text)) => Some(markdown::from_entities(text, &self.entities)),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct User {
    username: Option<String>,
}

/// Request body, rebuilt for every attempt
enum Payload {
    Json(Value),
    Multipart {
        fields: Vec<(&'static str, String)>,
        files: Vec<Upload>,
    },
}

struct Upload {
    field: String,
    file_name: String,
    bytes: Vec<u8>,
    mime: &'static str,
}

/// Failure of a single API call
enum CallError {
    /// 400, e.g. a message id that does not exist
    BadRequest(String),
    Channel(ChannelError),
}

impl From<CallError> for ChannelError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::BadRequest(description) => ChannelError::Api(description),
            CallError::Channel(err) => err,
        }
    }
}

impl From<ChannelError> for CallError {
    fn from(err: ChannelError) -> Self {
        CallError::Channel(err)
    }
}

/// Channel backed by the Bot API
pub struct TelegramChannel {
    client: Client,
    bot_token: SecretString,
    config: TelegramConfig,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString, config: TelegramConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            bot_token,
            config,
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base,
            self.bot_token.expose_secret(),
            method
        )
    }

    /// Bot username, used to verify the token
    pub async fn connect(&self) -> Result<String, ChannelError> {
        let me: User = self.call("getMe", Payload::Json(json!({}))).await?;
        let username = me.username.unwrap_or_default();
        tracing::info!(username = %username, "Connected to Telegram bot");
        Ok(username)
    }

    fn request(&self, method: &str, payload: &Payload) -> Result<RequestBuilder, ChannelError> {
        let builder = self.client.post(self.api_url(method));
        match payload {
            Payload::Json(body) => Ok(builder.json(body)),
            Payload::Multipart { fields, files } => {
                let mut form = Form::new();
                for (name, value) in fields {
                    form = form.text(*name, value.clone());
                }
                for upload in files {
                    let part = Part::bytes(upload.bytes.clone())
                        .file_name(upload.file_name.clone())
                        .mime_str(upload.mime)
                        .map_err(|e| ChannelError::Api(e.to_string()))?;
                    form = form.part(upload.field.clone(), part);
                }
                Ok(builder.multipart(form))
            }
        }
    }

    /// Call a method, sleeping through rate limits up to `max_retries` times
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: Payload,
    ) -> Result<T, CallError> {
        let mut attempt = 0;
        loop {
            let response = self
                .request(method, &payload)?
                .send()
                .await
                .map_err(|e| ChannelError::Network(e.to_string()))?;

            let status = response.status();
            let body: ApiResponse<T> = response.json().await.map_err(|e| {
                ChannelError::Api(format!("Unreadable {} response ({}): {}", method, status, e))
            })?;

            if body.ok {
                return body
                    .result
                    .ok_or_else(|| ChannelError::Api(format!("{} returned no result", method)).into());
            }

            let description = body.description.unwrap_or_default();
            let code = body
                .error_code
                .and_then(|c| StatusCode::from_u16(c).ok())
                .unwrap_or(status);

            match code {
                StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = body
                        .parameters
                        .and_then(|p| p.retry_after)
                        .map(Duration::from_secs);
                    if attempt >= self.config.max_retries {
                        return Err(ChannelError::RateLimited(retry_after).into());
                    }
                    let wait = retry_after.unwrap_or(Duration::from_secs(1));
                    tracing::warn!(
                        method = %method,
                        wait_secs = wait.as_secs(),
                        attempt,
                        "Rate limited by Telegram"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => {
                    return Err(ChannelError::Auth(format!("{}: {}", method, description)).into());
                }
                StatusCode::BAD_REQUEST => {
                    return Err(CallError::BadRequest(format!("{}: {}", method, description)));
                }
                _ => {
                    return Err(ChannelError::Api(format!("{}: {}", method, description)).into());
                }
            }
        }
    }

    async fn upload(media: &LocalMedia, field: String) -> Result<Upload, ChannelError> {
        let bytes = tokio::fs::read(&media.path).await?;
        let file_name = media
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("file.{}", media.kind.extension()));
        Ok(Upload {
            field,
            file_name,
            bytes,
            mime: mime_for(media.kind),
        })
    }

    /// One photo, video or audio file, optionally captioned
    async fn send_single(
        &self,
        media: &LocalMedia,
        caption: Option<&str>,
    ) -> Result<Message, ChannelError> {
        let (method, field) = match media.kind {
            MediaKind::Photo => ("sendPhoto", "photo"),
            MediaKind::Video => ("sendVideo", "video"),
            MediaKind::Audio => ("sendAudio", "audio"),
        };

        let mut fields = vec![("chat_id", self.config.channel_id.clone())];
        if let Some(caption) = caption {
            fields.push(("caption", markdown::to_html(caption)));
            fields.push(("parse_mode", "HTML".to_string()));
        }
        if media.kind == MediaKind::Video {
            fields.push(("supports_streaming", "true".to_string()));
        }

        let files = vec![Self::upload(media, field.to_string()).await?];
        Ok(self
            .call(method, Payload::Multipart { fields, files })
            .await?)
    }

    /// An album of 2..=10 photos and videos; caption rides on the first item
    async fn send_album(
        &self,
        items: &[&LocalMedia],
        caption: Option<&str>,
    ) -> Result<Vec<Message>, ChannelError> {
        let mut media = Vec::with_capacity(items.len());
        let mut files = Vec::with_capacity(items.len());

        for (index, item) in items.iter().enumerate() {
            let field = format!("file{}", index);
            let mut entry = json!({
                "type": if item.kind == MediaKind::Video { "video" } else { "photo" },
                "media": format!("attach://{}", field),
            });
            if index == 0 {
                if let Some(caption) = caption {
                    entry["caption"] = json!(markdown::to_html(caption));
                    entry["parse_mode"] = json!("HTML");
                }
            }
            media.push(entry);
            files.push(Self::upload(item, field).await?);
        }

        let fields = vec![
            ("chat_id", self.config.channel_id.clone()),
            ("media", Value::Array(media).to_string()),
        ];
        Ok(self
            .call("sendMediaGroup", Payload::Multipart { fields, files })
            .await?)
    }

    async fn delete_in(&self, chat_id: &str, id: MessageId) -> Result<(), ChannelError> {
        let _: bool = self
            .call(
                "deleteMessage",
                Payload::Json(json!({ "chat_id": chat_id, "message_id": id })),
            )
            .await?;
        Ok(())
    }
}

fn mime_for(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Photo => "image/jpeg",
        MediaKind::Video => "video/mp4",
        MediaKind::Audio => "audio/mpeg",
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    async fn send_post(
        &self,
        caption: &str,
        attachments: &[LocalMedia],
    ) -> Result<ChannelMessage, ChannelError> {
        let (audio, visual): (Vec<&LocalMedia>, Vec<&LocalMedia>) = attachments
            .iter()
            .partition(|m| m.kind == MediaKind::Audio);

        let mut first: Option<Message> = None;

        for chunk in visual.chunks(MAX_ALBUM) {
            let caption = first.is_none().then_some(caption);
            let sent = if chunk.len() == 1 {
                vec![self.send_single(chunk[0], caption).await?]
            } else {
                self.send_album(chunk, caption).await?
            };
            if first.is_none() {
                first = sent.into_iter().next();
            }
        }

        for track in audio {
            let caption = first.is_none().then_some(caption);
            let sent = self.send_single(track, caption).await?;
            if first.is_none() {
                first = Some(sent);
            }
        }

        let first = first.ok_or(ChannelError::Empty)?;
        tracing::debug!(message_id = first.message_id, "Sent post");

        Ok(ChannelMessage {
            id: first.message_id,
            text: first.markdown(),
        })
    }

    async fn send_text(&self, text: &str) -> Result<MessageId, ChannelError> {
        let message: Message = self
            .call(
                "sendMessage",
                Payload::Json(json!({
                    "chat_id": self.config.channel_id,
                    "text": text,
                    "disable_notification": true,
                })),
            )
            .await?;
        Ok(message.message_id)
    }

    async fn fetch_message(&self, id: MessageId) -> Result<Option<ChannelMessage>, ChannelError> {
        let result: Result<Message, CallError> = self
            .call(
                "forwardMessage",
                Payload::Json(json!({
                    "chat_id": self.config.scratch_chat_id,
                    "from_chat_id": self.config.channel_id,
                    "message_id": id,
                    "disable_notification": true,
                })),
            )
            .await;

        let copy = match result {
            Ok(copy) => copy,
            // Deleted, service or never-existing ids
            Err(CallError::BadRequest(reason)) => {
                tracing::trace!(message_id = id, reason = %reason, "No message");
                return Ok(None);
            }
            Err(CallError::Channel(err)) => return Err(err),
        };

        if let Err(e) = self
            .delete_in(&self.config.scratch_chat_id, copy.message_id)
            .await
        {
            tracing::warn!(error = %e, "Failed to delete forwarded copy");
        }

        Ok(Some(ChannelMessage {
            id,
            text: copy.markdown(),
        }))
    }

    async fn delete_message(&self, id: MessageId) -> Result<(), ChannelError> {
        self.delete_in(&self.config.channel_id, id).await
    }
}
