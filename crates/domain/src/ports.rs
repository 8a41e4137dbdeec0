//! Port definitions (traits) for external dependencies
//!
//! These traits define the boundaries between the domain and external systems.
//! Adapters implement these traits to connect to real infrastructure.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use crate::challenge::ChallengeUnsolved;
use crate::model::{ChannelMessage, MediaAsset, MediaKind, MessageId, SourcePost, SourcePostId};

/// Error type for feed operations
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limited")]
    RateLimited,
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Challenge failed: {0}")]
    Challenge(#[from] ChallengeUnsolved),
    #[error("Challenge page repeated after solving")]
    ChallengeRepeated,
    #[error("Malformed record: {message}")]
    Parse { message: String, raw: String },
    #[error("Item {0} not found")]
    NotFound(SourcePostId),
}

/// One page of a newest-first feed
#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    /// Parsed posts in upstream order (newest first)
    pub posts: Vec<SourcePost>,
    /// Opaque cursor for the next page
    pub next_cursor: String,
    pub has_more: bool,
}

/// Port for a paginated, newest-first feed of posts
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the page after `cursor`. The first page uses an empty cursor.
    async fn fetch_page(&self, cursor: &str) -> Result<FeedPage, FeedError>;

    /// Re-request a single item, used when its media arrived incomplete
    async fn fetch_item(&self, id: SourcePostId) -> Result<SourcePost, FeedError>;
}

/// Error type for channel operations
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limited, retry after: {0:?}")]
    RateLimited(Option<std::time::Duration>),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Nothing to send")]
    Empty,
}

/// A downloaded asset ready to be attached to a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMedia {
    pub path: PathBuf,
    pub kind: MediaKind,
}

/// Port for the target messaging channel
#[async_trait]
pub trait Channel: Send + Sync {
    /// Send a captioned post with ordered attachments.
    /// Returns the message that carries the caption.
    async fn send_post(
        &self,
        caption: &str,
        attachments: &[LocalMedia],
    ) -> Result<ChannelMessage, ChannelError>;

    /// Send a silent plain-text message, returning its id
    async fn send_text(&self, text: &str) -> Result<MessageId, ChannelError>;

    /// Fetch one message. `None` for gaps (deleted or service messages).
    async fn fetch_message(&self, id: MessageId) -> Result<Option<ChannelMessage>, ChannelError>;

    async fn delete_message(&self, id: MessageId) -> Result<(), ChannelError>;
}

/// Error type for media operations
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Download of {filename} rejected: {reason}")]
    DownloadValidationFailed { filename: String, reason: String },
    #[error("No source URL for {0}")]
    NoSource(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Port for fetching and cleaning up a post's media
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Download every asset not already cached. Returns local files in asset order.
    async fn fetch(&self, assets: &[MediaAsset]) -> Result<Vec<LocalMedia>, MediaError>;

    /// Best-effort removal of downloaded files
    async fn delete(&self, assets: &[MediaAsset]);
}
