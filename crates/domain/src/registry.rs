//! Ordered, in-memory registry of combined posts
//!
//! Entries are kept newest-first, where "newest" means discovered earliest
//! in a newest-first feed walk. The registry is rebuilt from the feeds and
//! the channel on every start; nothing is persisted locally.

use indexmap::IndexMap;

use crate::model::{
    CombinedPost, DuplicatePost, MessagingPost, SourcePost, SourcePostId,
};

#[derive(Debug, Clone, Default)]
pub struct PostRegistry {
    posts: IndexMap<SourcePostId, CombinedPost>,
}

impl PostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn contains(&self, id: SourcePostId) -> bool {
        self.posts.contains_key(&id)
    }

    pub fn get(&self, id: SourcePostId) -> Option<&CombinedPost> {
        self.posts.get(&id)
    }

    /// Iterate newest-first
    pub fn iter(&self) -> impl Iterator<Item = &CombinedPost> {
        self.posts.values()
    }

    /// Ids newest-first
    pub fn ids(&self) -> Vec<SourcePostId> {
        self.posts.keys().copied().collect()
    }

    /// Prepend a newest-first batch. Ids already present are skipped.
    /// Returns how many posts were inserted.
    pub fn add(&mut self, batch: Vec<SourcePost>) -> usize {
        let mut merged = IndexMap::with_capacity(self.posts.len() + batch.len());
        for post in batch {
            if self.posts.contains_key(&post.id) || merged.contains_key(&post.id) {
                continue;
            }
            merged.insert(post.id, CombinedPost::new(post));
        }
        let inserted = merged.len();
        merged.extend(self.posts.drain(..));
        self.posts = merged;
        inserted
    }

    /// Raise flags on an existing entry. Flags are never lowered.
    /// Returns whether any flag changed.
    pub fn raise_flags(&mut self, id: SourcePostId, liked: bool, favorited: bool) -> bool {
        let Some(post) = self.posts.get_mut(&id) else {
            return false;
        };
        let before = (post.source.liked, post.source.favorited);
        post.source.liked |= liked;
        post.source.favorited |= favorited;
        before != (post.source.liked, post.source.favorited)
    }

    /// Link channel history to known posts. Unmatched records are ignored.
    /// Returns how many records matched.
    pub fn link_messaging(&mut self, batch: impl IntoIterator<Item = MessagingPost>) -> usize {
        let mut linked = 0;
        for message in batch {
            match self.posts.get_mut(&message.source_post_id) {
                Some(post) => {
                    post.relink(message);
                    linked += 1;
                }
                None => {
                    tracing::debug!(
                        source_post_id = message.source_post_id,
                        message_id = message.message_id,
                        "No source post for channel message"
                    );
                }
            }
        }
        linked
    }

    /// Record a freshly sent message. Posting twice is an internal error.
    pub fn mark_posted(&mut self, message: MessagingPost) -> Result<(), RegistryError> {
        let post = self
            .posts
            .get_mut(&message.source_post_id)
            .ok_or(RegistryError::Unknown(message.source_post_id))?;
        post.attach(message)?;
        Ok(())
    }

    /// Entries without a channel message, newest-first
    pub fn unposted(&self) -> Vec<&CombinedPost> {
        self.posts.values().filter(|p| p.unposted()).collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown source post {0}")]
    Unknown(SourcePostId),
    #[error(transparent)]
    Duplicate(#[from] DuplicatePost),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MediaAsset, MediaKind, PostKind};

    fn post(id: SourcePostId) -> SourcePost {
        SourcePost {
            id,
            kind: PostKind::Video,
            url: format!("https://www.tiktok.com/@someone/video/{}", id),
            liked: true,
            favorited: false,
            media: vec![MediaAsset::new(
                id,
                MediaKind::Video,
                0,
                vec![format!("https://cdn.example/{}.mp4", id)],
            )],
        }
    }

    fn message(message_id: i64, source_post_id: SourcePostId) -> MessagingPost {
        MessagingPost {
            message_id,
            source_post_id,
            url: format!("https://www.tiktok.com/@someone/video/{}", source_post_id),
            liked: true,
            favorited: true,
        }
    }

    #[test]
    fn test_add_prepends_batches() {
        let mut registry = PostRegistry::new();
        assert_eq!(registry.add(vec![post(5), post(4), post(3)]), 3);
        assert_eq!(registry.add(vec![post(7), post(6), post(5)]), 2);
        assert_eq!(registry.ids(), vec![7, 6, 5, 4, 3]);
    }

    #[test]
    fn test_add_keeps_existing_entry() {
        let mut registry = PostRegistry::new();
        registry.add(vec![post(1)]);
        registry.mark_posted(message(10, 1)).unwrap();

        let mut replacement = post(1);
        replacement.favorited = true;
        registry.add(vec![replacement]);

        let kept = registry.get(1).unwrap();
        assert_eq!(kept.message_id(), 10);
        assert!(!kept.source.favorited);
    }

    #[test]
    fn test_link_messaging_ignores_unmatched() {
        let mut registry = PostRegistry::new();
        registry.add(vec![post(2), post(1)]);

        let linked = registry.link_messaging(vec![message(20, 2), message(30, 99)]);

        assert_eq!(linked, 1);
        assert_eq!(registry.get(2).unwrap().message_id(), 20);
        assert!(registry.get(2).unwrap().displayed_favorited());
        assert!(!registry.contains(99));
    }

    #[test]
    fn test_link_messaging_is_idempotent() {
        let mut registry = PostRegistry::new();
        registry.add(vec![post(2)]);
        registry.link_messaging(vec![message(20, 2)]);
        registry.link_messaging(vec![message(20, 2)]);
        assert_eq!(registry.get(2).unwrap().message_id(), 20);
    }

    #[test]
    fn test_unposted_never_returns_posted() {
        let mut registry = PostRegistry::new();
        registry.add(vec![post(4), post(3), post(2), post(1)]);
        registry.link_messaging(vec![message(11, 1)]);
        registry.mark_posted(message(13, 3)).unwrap();

        let pending: Vec<_> = registry.unposted().iter().map(|p| p.id()).collect();
        assert_eq!(pending, vec![4, 2]);
        assert!(registry.unposted().iter().all(|p| p.message_id() == 0));
    }

    #[test]
    fn test_mark_posted_twice_fails() {
        let mut registry = PostRegistry::new();
        registry.add(vec![post(1)]);
        registry.mark_posted(message(10, 1)).unwrap();

        let result = registry.mark_posted(message(11, 1));
        assert!(matches!(result, Err(RegistryError::Duplicate(_))));
        assert_eq!(registry.get(1).unwrap().message_id(), 10);
    }

    #[test]
    fn test_mark_posted_unknown() {
        let mut registry = PostRegistry::new();
        assert!(matches!(
            registry.mark_posted(message(10, 1)),
            Err(RegistryError::Unknown(1))
        ));
    }

    #[test]
    fn test_raise_flags_is_monotonic() {
        let mut registry = PostRegistry::new();
        registry.add(vec![post(1)]);
        assert!(registry.raise_flags(1, false, true));
        assert!(!registry.raise_flags(1, false, false));
        assert!(!registry.raise_flags(2, true, true));

        let entry = registry.get(1).unwrap();
        assert!(entry.source.liked);
        assert!(entry.source.favorited);
    }
}
