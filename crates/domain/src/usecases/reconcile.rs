//! Feed reconciliation use case - merges the liked and favorited feeds into the registry

use indexmap::IndexMap;
use tokio::time::{Duration, sleep};

use crate::{
    model::{FeedKind, SourcePost, SourcePostId},
    ports::{FeedError, FeedSource},
    registry::PostRegistry,
};

/// Configuration for the reconciler
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Pause after every page request
    pub page_delay: Duration,
    /// How many times an item with incomplete media is re-requested
    pub media_retry_limit: u32,
    /// Pause before each re-request
    pub media_retry_delay: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            page_delay: Duration::from_millis(1500),
            media_retry_limit: 3,
            media_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Errors that abort a reconciliation cycle
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("{feed} feed failed: {source}")]
    Feed {
        feed: FeedKind,
        #[source]
        source: FeedError,
    },
    #[error("Post {id} still has incomplete media after {attempts} re-requests")]
    IncompleteMedia { id: SourcePostId, attempts: u32 },
}

/// Per-feed walk statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedWalk {
    pub pages: usize,
    /// Items whose flag was raised
    pub flagged: usize,
    /// First already-flagged item, where the walk stopped early
    pub stopped_at: Option<SourcePostId>,
}

/// Outcome of a successful cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub new_posts: usize,
    pub updated_posts: usize,
    pub liked: FeedWalk,
    pub favorited: FeedWalk,
}

/// Drains both feeds and merges them into a registry
pub struct FeedReconciler<'a, L, F>
where
    L: FeedSource + ?Sized,
    F: FeedSource + ?Sized,
{
    liked: &'a L,
    favorited: &'a F,
    config: ReconcileConfig,
}

impl<'a, L, F> FeedReconciler<'a, L, F>
where
    L: FeedSource + ?Sized,
    F: FeedSource + ?Sized,
{
    pub fn new(liked: &'a L, favorited: &'a F, config: ReconcileConfig) -> Self {
        Self {
            liked,
            favorited,
            config,
        }
    }

    /// Run one cycle. On error the registry is left untouched.
    pub async fn reconcile(
        &self,
        registry: &mut PostRegistry,
    ) -> Result<ReconcileReport, ReconcileError> {
        tracing::info!(known = registry.len(), "Fetching new posts");

        let mut batch = PendingBatch::default();

        // Liked first: favorited is usually a subset, and this keeps liked order
        let liked = self
            .drain(FeedKind::Liked, self.liked, registry, &mut batch)
            .await?;
        let favorited = self
            .drain(FeedKind::Favorited, self.favorited, registry, &mut batch)
            .await?;

        let (new_posts, updated_posts) = batch.commit(registry);

        tracing::info!(new_posts, updated_posts, "Fetched new posts");

        Ok(ReconcileReport {
            new_posts,
            updated_posts,
            liked,
            favorited,
        })
    }

    async fn drain<S: FeedSource + ?Sized>(
        &self,
        feed: FeedKind,
        source: &S,
        registry: &PostRegistry,
        batch: &mut PendingBatch,
    ) -> Result<FeedWalk, ReconcileError> {
        let mut walk = FeedWalk::default();
        let mut cursor = String::new();

        loop {
            let page = source
                .fetch_page(&cursor)
                .await
                .map_err(|source| ReconcileError::Feed { feed, source })?;
            walk.pages += 1;

            tracing::debug!(
                feed = %feed,
                fetched = page.posts.len(),
                flagged = walk.flagged,
                has_more = page.has_more,
                "Fetched page"
            );

            if !self.config.page_delay.is_zero() {
                sleep(self.config.page_delay).await;
            }

            for post in page.posts {
                let id = post.id;
                if !batch.contains(id) && !registry.contains(id) {
                    let post = if post.media_complete() {
                        post
                    } else {
                        self.complete_media(feed, source, post).await?
                    };
                    batch.insert_new(post);
                }

                let Some(entry) = batch.entry_mut(id, registry) else {
                    continue;
                };

                if entry.flag(feed) {
                    // Feeds are stable and flags monotonic: the rest is already known
                    tracing::info!(feed = %feed, post_id = id, "Stopping at already fetched post");
                    walk.stopped_at = Some(id);
                    return Ok(walk);
                }

                entry.raise(feed);
                walk.flagged += 1;
            }

            if !page.has_more {
                break;
            }
            if page.next_cursor == cursor {
                tracing::warn!(feed = %feed, cursor = %cursor, "Cursor did not advance, stopping");
                break;
            }
            cursor = page.next_cursor;
        }

        Ok(walk)
    }

    async fn complete_media<S: FeedSource + ?Sized>(
        &self,
        feed: FeedKind,
        source: &S,
        post: SourcePost,
    ) -> Result<SourcePost, ReconcileError> {
        let id = post.id;
        for attempt in 1..=self.config.media_retry_limit {
            tracing::warn!(post_id = id, attempt, "Media incomplete, re-requesting item");
            if !self.config.media_retry_delay.is_zero() {
                sleep(self.config.media_retry_delay).await;
            }

            let refreshed = source
                .fetch_item(id)
                .await
                .map_err(|source| ReconcileError::Feed { feed, source })?;
            if refreshed.media_complete() {
                return Ok(refreshed);
            }
        }

        Err(ReconcileError::IncompleteMedia {
            id,
            attempts: self.config.media_retry_limit,
        })
    }
}

/// Changes accumulated during one cycle, applied only on success
#[derive(Debug, Default)]
struct PendingBatch {
    /// Posts first seen this cycle, newest-first
    fresh: IndexMap<SourcePostId, SourcePost>,
    /// Copies of registry posts whose flags may change
    touched: IndexMap<SourcePostId, SourcePost>,
}

impl PendingBatch {
    fn contains(&self, id: SourcePostId) -> bool {
        self.fresh.contains_key(&id) || self.touched.contains_key(&id)
    }

    fn insert_new(&mut self, mut post: SourcePost) {
        // Flags are owned by the reconciler, not by whatever the feed reported
        post.liked = false;
        post.favorited = false;
        self.fresh.insert(post.id, post);
    }

    fn entry_mut(&mut self, id: SourcePostId, registry: &PostRegistry) -> Option<&mut SourcePost> {
        if self.fresh.contains_key(&id) {
            return self.fresh.get_mut(&id);
        }
        if !self.touched.contains_key(&id) {
            let existing = registry.get(id)?.source.clone();
            self.touched.insert(id, existing);
        }
        self.touched.get_mut(&id)
    }

    fn commit(self, registry: &mut PostRegistry) -> (usize, usize) {
        let updated = self
            .touched
            .into_iter()
            .filter(|(id, post)| registry.raise_flags(*id, post.liked, post.favorited))
            .count();
        let added = registry.add(self.fresh.into_values().collect());
        (added, updated)
    }
}
