//! Domain models and value objects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable numeric id of a post on the source platform
pub type SourcePostId = u64;

/// Id of a message in the target channel. Zero means "not posted".
pub type MessageId = i64;

/// Which upstream feed an item was discovered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    Liked,
    Favorited,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Liked => "liked",
            FeedKind::Favorited => "favorited",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a source post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostKind {
    Photo,
    Video,
}

impl PostKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostKind::Photo => "photo",
            PostKind::Video => "video",
        }
    }
}

impl fmt::Display for PostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a downloadable media asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }

    /// File extension used for the downloaded asset
    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Photo => "jpg",
            MediaKind::Video => "mp4",
            MediaKind::Audio => "mp3",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One binary asset referenced by a post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAsset {
    pub post_id: SourcePostId,
    pub kind: MediaKind,
    pub sequence: usize,
    /// Candidate URLs, tried in order
    pub source_urls: Vec<String>,
    /// Track title (audio only)
    pub display_name: Option<String>,
    /// Cover art URL (audio only)
    pub cover_url: Option<String>,
}

impl MediaAsset {
    pub fn new(
        post_id: SourcePostId,
        kind: MediaKind,
        sequence: usize,
        source_urls: Vec<String>,
    ) -> Self {
        Self {
            post_id,
            kind,
            sequence,
            source_urls,
            display_name: None,
            cover_url: None,
        }
    }

    pub fn with_display_name(mut self, name: Option<String>) -> Self {
        self.display_name = name;
        self
    }

    pub fn with_cover_url(mut self, url: Option<String>) -> Self {
        self.cover_url = url;
        self
    }

    /// Deterministic local filename, e.g. `7455398333754952967_photo_2.jpg`
    pub fn filename(&self) -> String {
        format!(
            "{}_{}_{}.{}",
            self.post_id,
            self.kind,
            self.sequence,
            self.kind.extension()
        )
    }

    pub fn has_source(&self) -> bool {
        self.source_urls.iter().any(|u| !u.trim().is_empty())
    }
}

/// A post as reported by the source platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePost {
    pub id: SourcePostId,
    pub kind: PostKind,
    pub url: String,
    pub liked: bool,
    pub favorited: bool,
    pub media: Vec<MediaAsset>,
}

impl SourcePost {
    /// Whether every visual asset the post needs is present.
    ///
    /// Upstream sometimes serves items before their media is populated. A
    /// photo post needs at least one image; a video post needs its video.
    /// Audio is optional.
    pub fn media_complete(&self) -> bool {
        let visual: Vec<_> = self
            .media
            .iter()
            .filter(|m| m.kind != MediaKind::Audio)
            .collect();
        !visual.is_empty() && visual.iter().all(|m| m.has_source())
    }

    pub fn flag(&self, feed: FeedKind) -> bool {
        match feed {
            FeedKind::Liked => self.liked,
            FeedKind::Favorited => self.favorited,
        }
    }

    /// Raise a flag. Flags never go back to false.
    pub fn raise(&mut self, feed: FeedKind) {
        match feed {
            FeedKind::Liked => self.liked = true,
            FeedKind::Favorited => self.favorited = true,
        }
    }
}

/// A post as recovered from a channel message caption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagingPost {
    pub message_id: MessageId,
    pub source_post_id: SourcePostId,
    pub url: String,
    pub liked: bool,
    pub favorited: bool,
}

/// A raw channel message, as far as the domain cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub id: MessageId,
    /// Message text or media caption, with formatting rendered back to markdown
    pub text: Option<String>,
}

/// Source post joined with at most one channel message
#[derive(Debug, Clone, Serialize)]
pub struct CombinedPost {
    pub source: SourcePost,
    pub message: Option<MessagingPost>,
}

/// Raised when a post that already has a channel message is posted again
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("post {source_post_id} already linked to message {existing}, refusing {attempted}")]
pub struct DuplicatePost {
    pub source_post_id: SourcePostId,
    pub existing: MessageId,
    pub attempted: MessageId,
}

impl CombinedPost {
    pub fn new(source: SourcePost) -> Self {
        Self {
            source,
            message: None,
        }
    }

    pub fn id(&self) -> SourcePostId {
        self.source.id
    }

    pub fn message_id(&self) -> MessageId {
        self.message.as_ref().map(|m| m.message_id).unwrap_or(0)
    }

    pub fn unposted(&self) -> bool {
        self.message_id() == 0
    }

    /// Liked flag as last shown in the channel, falling back to the source
    pub fn displayed_liked(&self) -> bool {
        self.message
            .as_ref()
            .map(|m| m.liked)
            .unwrap_or(self.source.liked)
    }

    pub fn displayed_favorited(&self) -> bool {
        self.message
            .as_ref()
            .map(|m| m.favorited)
            .unwrap_or(self.source.favorited)
    }

    /// Attach a freshly sent message. Fails if a message is already set.
    pub fn attach(&mut self, message: MessagingPost) -> Result<(), DuplicatePost> {
        if let Some(existing) = &self.message {
            return Err(DuplicatePost {
                source_post_id: self.source.id,
                existing: existing.message_id,
                attempted: message.message_id,
            });
        }
        self.message = Some(message);
        Ok(())
    }

    /// Link a message found in channel history. Last write wins.
    pub fn relink(&mut self, message: MessagingPost) {
        self.message = Some(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(id: SourcePostId) -> SourcePost {
        SourcePost {
            id,
            kind: PostKind::Video,
            url: format!("https://www.tiktok.com/@someone/video/{}", id),
            liked: false,
            favorited: false,
            media: vec![MediaAsset::new(
                id,
                MediaKind::Video,
                0,
                vec!["https://cdn.example/v.mp4".to_string()],
            )],
        }
    }

    fn message(message_id: MessageId, source_post_id: SourcePostId) -> MessagingPost {
        MessagingPost {
            message_id,
            source_post_id,
            url: String::new(),
            liked: true,
            favorited: false,
        }
    }

    #[test]
    fn test_filename_is_deterministic() {
        let asset = MediaAsset::new(42, MediaKind::Photo, 3, vec![]);
        assert_eq!(asset.filename(), "42_photo_3.jpg");

        let audio = MediaAsset::new(42, MediaKind::Audio, 4, vec![]);
        assert_eq!(audio.filename(), "42_audio_4.mp3");
    }

    #[test]
    fn test_media_complete() {
        assert!(video(1).media_complete());

        let mut missing_url = video(2);
        missing_url.media[0].source_urls = vec!["".to_string()];
        assert!(!missing_url.media_complete());

        let mut audio_only = video(3);
        audio_only.media = vec![MediaAsset::new(
            3,
            MediaKind::Audio,
            0,
            vec!["https://cdn.example/a.mp3".to_string()],
        )];
        assert!(!audio_only.media_complete());
    }

    #[test]
    fn test_attach_twice_is_rejected() {
        let mut post = CombinedPost::new(video(7));
        assert!(post.unposted());

        post.attach(message(100, 7)).unwrap();
        assert_eq!(post.message_id(), 100);

        let err = post.attach(message(101, 7)).unwrap_err();
        assert_eq!(err.existing, 100);
        assert_eq!(err.attempted, 101);
        assert_eq!(post.message_id(), 100);
    }

    #[test]
    fn test_relink_last_write_wins() {
        let mut post = CombinedPost::new(video(7));
        post.relink(message(100, 7));
        post.relink(message(90, 7));
        assert_eq!(post.message_id(), 90);
        assert!(post.displayed_liked());
    }
}
