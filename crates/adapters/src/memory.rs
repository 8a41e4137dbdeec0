//! In-memory feed and channel for testing and offline runs

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use tikdog_domain::{
    Channel, ChannelError, ChannelMessage, FeedError, FeedPage, FeedSource, LocalMedia, MessageId,
    SourcePost, SourcePostId,
};

/// Newest-first feed paged by numeric offset cursors
pub struct InMemoryFeed {
    posts: RwLock<Vec<SourcePost>>,
    page_size: usize,
    page_requests: AtomicUsize,
}

impl InMemoryFeed {
    pub fn new(page_size: usize) -> Self {
        Self::with_posts(vec![], page_size)
    }

    /// `posts` newest first
    pub fn with_posts(posts: Vec<SourcePost>, page_size: usize) -> Self {
        Self {
            posts: RwLock::new(posts),
            page_size: page_size.max(1),
            page_requests: AtomicUsize::new(0),
        }
    }

    /// Simulate a new like or favorite
    pub fn push_newest(&self, post: SourcePost) -> Result<(), FeedError> {
        let mut posts = self
            .posts
            .write()
            .map_err(|e| FeedError::Api(e.to_string()))?;
        posts.insert(0, post);
        Ok(())
    }

    pub fn page_requests(&self) -> usize {
        self.page_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for InMemoryFeed {
    async fn fetch_page(&self, cursor: &str) -> Result<FeedPage, FeedError> {
        self.page_requests.fetch_add(1, Ordering::SeqCst);

        let offset: usize = if cursor.is_empty() {
            0
        } else {
            cursor
                .parse()
                .map_err(|_| FeedError::Api(format!("Invalid cursor {}", cursor)))?
        };

        let posts = self
            .posts
            .read()
            .map_err(|e| FeedError::Api(e.to_string()))?;
        let start = offset.min(posts.len());
        let end = (start + self.page_size).min(posts.len());

        Ok(FeedPage {
            posts: posts[start..end].to_vec(),
            next_cursor: end.to_string(),
            has_more: end < posts.len(),
        })
    }

    async fn fetch_item(&self, id: SourcePostId) -> Result<SourcePost, FeedError> {
        let posts = self
            .posts
            .read()
            .map_err(|e| FeedError::Api(e.to_string()))?;
        posts
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or(FeedError::NotFound(id))
    }
}

/// Channel keeping messages in a map. Every attachment takes one message id.
pub struct InMemoryChannel {
    messages: RwLock<BTreeMap<MessageId, ChannelMessage>>,
    last_id: RwLock<MessageId>,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(BTreeMap::new()),
            last_id: RwLock::new(0),
        }
    }

    /// All live messages, oldest first
    pub fn messages(&self) -> Vec<ChannelMessage> {
        self.messages
            .read()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    fn store(&self, text: Option<String>) -> Result<MessageId, ChannelError> {
        let mut last_id = self
            .last_id
            .write()
            .map_err(|e| ChannelError::Api(e.to_string()))?;
        *last_id += 1;
        let id = *last_id;

        self.messages
            .write()
            .map_err(|e| ChannelError::Api(e.to_string()))?
            .insert(id, ChannelMessage { id, text });
        Ok(id)
    }
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for InMemoryChannel {
    async fn send_post(
        &self,
        caption: &str,
        attachments: &[LocalMedia],
    ) -> Result<ChannelMessage, ChannelError> {
        if attachments.is_empty() {
            return Err(ChannelError::Empty);
        }
        for media in attachments {
            if !media.path.exists() {
                return Err(ChannelError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} not found", media.path.display()),
                )));
            }
        }

        let id = self.store(Some(caption.to_string()))?;
        for _ in 1..attachments.len() {
            self.store(None)?;
        }

        Ok(ChannelMessage {
            id,
            text: Some(caption.to_string()),
        })
    }

    async fn send_text(&self, text: &str) -> Result<MessageId, ChannelError> {
        self.store(Some(text.to_string()))
    }

    async fn fetch_message(&self, id: MessageId) -> Result<Option<ChannelMessage>, ChannelError> {
        let messages = self
            .messages
            .read()
            .map_err(|e| ChannelError::Api(e.to_string()))?;
        Ok(messages.get(&id).cloned())
    }

    async fn delete_message(&self, id: MessageId) -> Result<(), ChannelError> {
        self.messages
            .write()
            .map_err(|e| ChannelError::Api(e.to_string()))?
            .remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tikdog_domain::{MediaAsset, MediaKind, PostKind};

    fn post(id: SourcePostId) -> SourcePost {
        SourcePost {
            id,
            kind: PostKind::Photo,
            url: format!("https://www.tiktok.com/@a/photo/{}", id),
            liked: false,
            favorited: false,
            media: vec![MediaAsset::new(id, MediaKind::Photo, 0, vec!["u".to_string()])],
        }
    }

    #[tokio::test]
    async fn test_feed_pages() {
        let feed = InMemoryFeed::with_posts(vec![post(5), post(4), post(3), post(2), post(1)], 2);

        let first = feed.fetch_page("").await.unwrap();
        assert_eq!(first.posts.iter().map(|p| p.id).collect::<Vec<_>>(), vec![5, 4]);
        assert!(first.has_more);

        let last = feed.fetch_page("4").await.unwrap();
        assert_eq!(last.posts.len(), 1);
        assert!(!last.has_more);
        assert_eq!(feed.page_requests(), 2);

        assert!(matches!(
            feed.fetch_page("x").await,
            Err(FeedError::Api(_))
        ));
        assert!(matches!(
            feed.fetch_item(9).await,
            Err(FeedError::NotFound(9))
        ));
    }

    #[tokio::test]
    async fn test_channel_ids_and_deletes() {
        let channel = InMemoryChannel::new();
        let probe = channel.send_text(".").await.unwrap();
        channel.delete_message(probe).await.unwrap();

        assert_eq!(probe, 1);
        assert!(channel.fetch_message(1).await.unwrap().is_none());
        assert_eq!(channel.send_text("x").await.unwrap(), 2);
    }
}
