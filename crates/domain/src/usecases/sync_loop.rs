//! Sync loop use case - rebuild, then post, sleep and poll forever

use std::sync::Arc;
use tokio::time::{Duration, sleep};

use crate::{
    model::{CombinedPost, DuplicatePost, MessagingPost, SourcePostId},
    ports::{Channel, ChannelError, FeedSource, MediaError, MediaStore},
    registry::{PostRegistry, RegistryError},
    usecases::{
        caption::{Caption, render_caption},
        linker::{LinkError, LinkerConfig, MessagingLinker},
        reconcile::{FeedReconciler, ReconcileConfig, ReconcileError},
    },
};

/// Configuration for the sync loop
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Sleep between cycles, also used after a fault
    pub poll_interval: Duration,
    /// Log pending posts instead of sending them
    pub dry_run: bool,
    pub reconcile: ReconcileConfig,
    pub linker: LinkerConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1800),
            dry_run: false,
            reconcile: ReconcileConfig::default(),
            linker: LinkerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Full feed drain plus channel history scan
    Rebuilding,
    /// Incremental feed fetch
    Polling,
    /// Sending pending posts oldest-first
    Posting,
    Sleeping,
}

/// Errors from one state of the sync loop
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Reconcile failed: {0}")]
    Reconcile(#[from] ReconcileError),
    #[error("Link failed: {0}")]
    Link(#[from] LinkError),
    #[error("Media failed: {0}")]
    Media(#[from] MediaError),
    #[error("Channel failed: {0}")]
    Channel(#[from] ChannelError),
    #[error("Internal consistency violation: {0}")]
    DuplicatePost(#[from] DuplicatePost),
    #[error("Sent message for unknown post {0}")]
    UnknownPost(SourcePostId),
}

impl From<RegistryError> for SyncError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Duplicate(dup) => SyncError::DuplicatePost(dup),
            RegistryError::Unknown(id) => SyncError::UnknownPost(id),
        }
    }
}

/// Outcome of a posting pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostingReport {
    pub posted: usize,
    /// Posts whose media failed download validation
    pub skipped: usize,
    /// Posts left for the next cycle
    pub pending: usize,
}

/// Explicit context object owning the registry and all adapter handles
pub struct SyncLoop<L, F, C, M>
where
    L: FeedSource + ?Sized,
    F: FeedSource + ?Sized,
    C: Channel + ?Sized,
    M: MediaStore + ?Sized,
{
    liked: Arc<L>,
    favorited: Arc<F>,
    channel: Arc<C>,
    media: Arc<M>,
    config: SyncConfig,
    registry: PostRegistry,
    state: SyncState,
    rebuilt: bool,
    /// Set when a posting pass failed after a send may have landed
    needs_catch_up: bool,
}

impl<L, F, C, M> SyncLoop<L, F, C, M>
where
    L: FeedSource + ?Sized,
    F: FeedSource + ?Sized,
    C: Channel + ?Sized,
    M: MediaStore + ?Sized,
{
    pub fn new(
        liked: Arc<L>,
        favorited: Arc<F>,
        channel: Arc<C>,
        media: Arc<M>,
        config: SyncConfig,
    ) -> Self {
        Self {
            liked,
            favorited,
            channel,
            media,
            config,
            registry: PostRegistry::new(),
            state: SyncState::Rebuilding,
            rebuilt: false,
            needs_catch_up: false,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn registry(&self) -> &PostRegistry {
        &self.registry
    }

    /// Run forever. Faults are logged and followed by a sleep.
    pub async fn run_forever(&mut self) {
        loop {
            self.step().await;
        }
    }

    /// Execute the current state and move to the next one
    pub async fn step(&mut self) -> SyncState {
        let next = match self.state {
            SyncState::Rebuilding => match self.rebuild().await {
                Ok(()) => SyncState::Posting,
                Err(e) => self.fault(e),
            },
            SyncState::Polling => match self.poll().await {
                Ok(()) => SyncState::Posting,
                Err(e) => self.fault(e),
            },
            SyncState::Posting => match self.post_pending().await {
                Ok(_) => SyncState::Sleeping,
                Err(e) => self.fault(e),
            },
            SyncState::Sleeping => {
                tracing::info!(secs = self.config.poll_interval.as_secs(), "Sleeping");
                sleep(self.config.poll_interval).await;
                if self.rebuilt {
                    SyncState::Polling
                } else {
                    SyncState::Rebuilding
                }
            }
        };

        tracing::debug!(from = ?self.state, to = ?next, "State transition");
        self.state = next;
        next
    }

    fn fault(&mut self, err: SyncError) -> SyncState {
        match &err {
            SyncError::DuplicatePost(_) | SyncError::UnknownPost(_) => {
                tracing::error!(state = ?self.state, error = %err, "Internal error");
            }
            _ => {
                tracing::error!(state = ?self.state, error = %err, "Cycle failed");
            }
        }
        SyncState::Sleeping
    }

    /// Drain both feeds fully, then link the channel history.
    /// The registry is replaced only when both succeed.
    pub async fn rebuild(&mut self) -> Result<(), SyncError> {
        tracing::info!("Rebuilding registry");

        let mut registry = PostRegistry::new();
        FeedReconciler::new(
            self.liked.as_ref(),
            self.favorited.as_ref(),
            self.config.reconcile.clone(),
        )
        .reconcile(&mut registry)
        .await?;

        let report = MessagingLinker::new(self.channel.as_ref(), self.config.linker.clone())
            .rebuild(&mut registry)
            .await?;

        tracing::info!(
            posts = registry.len(),
            linked = report.linked,
            pending = registry.unposted().len(),
            "Registry rebuilt"
        );

        self.registry = registry;
        self.rebuilt = true;
        self.needs_catch_up = false;
        Ok(())
    }

    /// Incremental feed fetch, preceded by a channel catch-up after a failed pass
    pub async fn poll(&mut self) -> Result<(), SyncError> {
        if self.needs_catch_up {
            let after = self.registry.iter().map(|p| p.message_id()).max().unwrap_or(0);
            MessagingLinker::new(self.channel.as_ref(), self.config.linker.clone())
                .catch_up(after, &mut self.registry)
                .await?;
            self.needs_catch_up = false;
        }

        FeedReconciler::new(
            self.liked.as_ref(),
            self.favorited.as_ref(),
            self.config.reconcile.clone(),
        )
        .reconcile(&mut self.registry)
        .await?;

        Ok(())
    }

    /// Post every unposted entry oldest-first. The first failure aborts the
    /// rest of the pass, except media that fails validation, which is skipped.
    pub async fn post_pending(&mut self) -> Result<PostingReport, SyncError> {
        let pending: Vec<CombinedPost> = self
            .registry
            .unposted()
            .into_iter()
            .rev()
            .cloned()
            .collect();

        let mut report = PostingReport {
            pending: pending.len(),
            ..Default::default()
        };

        if pending.is_empty() {
            tracing::info!("Nothing to post");
            return Ok(report);
        }

        tracing::info!(count = pending.len(), "Posting pending posts");

        if self.config.dry_run {
            for post in &pending {
                tracing::info!(
                    post_id = post.id(),
                    url = %post.source.url,
                    liked = post.source.liked,
                    favorited = post.source.favorited,
                    "[DRY RUN] Would post"
                );
            }
            return Ok(report);
        }

        for post in &pending {
            match self.post_one(post).await {
                Ok(message) => {
                    tracing::info!(
                        post_id = post.id(),
                        message_id = message.message_id,
                        "Posted"
                    );
                    self.registry.mark_posted(message)?;
                    self.media.delete(&post.source.media).await;
                    report.posted += 1;
                    report.pending -= 1;
                }
                Err(SyncError::Media(MediaError::DownloadValidationFailed { filename, reason })) => {
                    tracing::warn!(
                        post_id = post.id(),
                        filename = %filename,
                        reason = %reason,
                        "Skipping post with invalid download"
                    );
                    report.skipped += 1;
                }
                Err(e) => {
                    if matches!(e, SyncError::Channel(_)) {
                        self.needs_catch_up = true;
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(
            posted = report.posted,
            skipped = report.skipped,
            "Posting pass finished"
        );

        Ok(report)
    }

    async fn post_one(&self, post: &CombinedPost) -> Result<MessagingPost, SyncError> {
        let files = self.media.fetch(&post.source.media).await?;
        let caption = render_caption(post);
        let sent = self.channel.send_post(&caption, &files).await?;

        let parsed = sent.text.as_deref().and_then(Caption::parse);
        let caption = match parsed {
            Some(caption) => caption,
            None => {
                tracing::warn!(
                    post_id = post.id(),
                    message_id = sent.id,
                    "Sent message did not echo a caption, using rendered one"
                );
                Caption::from_post(post)
            }
        };

        Ok(caption.into_messaging(sent.id))
    }
}
