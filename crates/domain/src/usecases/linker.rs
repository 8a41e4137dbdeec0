//! Linker use case - rebuilds "already posted" state from channel history

use std::collections::HashSet;

use crate::{
    model::{ChannelMessage, MessageId, MessagingPost},
    ports::{Channel, ChannelError},
    registry::PostRegistry,
    usecases::caption::Caption,
};

/// Configuration for history scans
#[derive(Debug, Clone)]
pub struct LinkerConfig {
    /// Consecutive missing message ids after which a scan is complete
    pub allowed_empty_gap: u32,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            allowed_empty_gap: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    /// Newest to oldest
    Backward,
    /// Oldest to newest
    Forward,
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Result of a history scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkReport {
    /// Messages found (gaps excluded)
    pub scanned: usize,
    /// Messages with a post caption
    pub parsed: usize,
    /// Captions matched to a registry entry
    pub linked: usize,
}

/// Parses channel messages back into posts and links them to the registry
pub struct MessagingLinker<'a, C: Channel + ?Sized> {
    channel: &'a C,
    config: LinkerConfig,
}

impl<'a, C: Channel + ?Sized> MessagingLinker<'a, C> {
    pub fn new(channel: &'a C, config: LinkerConfig) -> Self {
        Self { channel, config }
    }

    /// Inverse of caption rendering. `None` for non-post messages.
    pub fn parse_message(message: &ChannelMessage) -> Option<MessagingPost> {
        let text = message.text.as_deref()?;
        Caption::parse(text).map(|caption| caption.into_messaging(message.id))
    }

    /// Id of the newest message, found by sending and deleting a probe
    pub async fn last_message_id(&self) -> Result<MessageId, LinkError> {
        tracing::info!("Fetching last message ID");
        let probe = self.channel.send_text(".").await?;
        self.channel.delete_message(probe).await?;
        Ok(probe - 1)
    }

    /// Walk message ids one at a time from `start`.
    ///
    /// Stops after `allowed_empty_gap` consecutive missing ids, after
    /// `max_count` ids, at id zero, or on reaching an id in `known`.
    pub async fn scan(
        &self,
        start: MessageId,
        direction: ScanDirection,
        max_count: Option<u64>,
        known: &HashSet<MessageId>,
    ) -> Result<Vec<ChannelMessage>, LinkError> {
        let mut found = Vec::new();
        let mut missing = 0;
        let mut visited = 0u64;
        let mut id = start;

        while missing < self.config.allowed_empty_gap
            && max_count.is_none_or(|max| visited < max)
            && id > 0
            && !known.contains(&id)
        {
            match self.channel.fetch_message(id).await? {
                Some(message) => {
                    found.push(message);
                    missing = 0;
                }
                None => missing += 1,
            }
            visited += 1;
            id = match direction {
                ScanDirection::Backward => id - 1,
                ScanDirection::Forward => id + 1,
            };
        }

        tracing::debug!(
            start,
            direction = ?direction,
            visited,
            found = found.len(),
            "Scanned channel history"
        );

        Ok(found)
    }

    /// Full backward scan from the newest message, linking every caption found
    pub async fn rebuild(&self, registry: &mut PostRegistry) -> Result<LinkReport, LinkError> {
        let last = self.last_message_id().await?;
        let messages = self
            .scan(last, ScanDirection::Backward, None, &HashSet::new())
            .await?;
        let report = Self::link(registry, messages);

        tracing::info!(
            last_message_id = last,
            scanned = report.scanned,
            linked = report.linked,
            "Rebuilt channel linkage"
        );

        Ok(report)
    }

    /// Forward scan from `after + 1`, stopping at any message already linked
    pub async fn catch_up(
        &self,
        after: MessageId,
        registry: &mut PostRegistry,
    ) -> Result<LinkReport, LinkError> {
        let known: HashSet<MessageId> = registry
            .iter()
            .map(|p| p.message_id())
            .filter(|id| *id != 0)
            .collect();
        let messages = self
            .scan(after + 1, ScanDirection::Forward, None, &known)
            .await?;
        let report = Self::link(registry, messages);

        tracing::info!(after, linked = report.linked, "Caught up with channel");

        Ok(report)
    }

    fn link(registry: &mut PostRegistry, mut messages: Vec<ChannelMessage>) -> LinkReport {
        // Oldest first, so the newest message for a post wins
        messages.sort_by_key(|m| m.id);
        let posts: Vec<MessagingPost> = messages.iter().filter_map(Self::parse_message).collect();

        LinkReport {
            scanned: messages.len(),
            parsed: posts.len(),
            linked: registry.link_messaging(posts),
        }
    }
}
