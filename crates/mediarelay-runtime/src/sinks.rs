use crate::destination::Destination;
use crate::reconciler::{MessageReconciler, ReconcileOutcome};
use crate::worker::Sink;
use anyhow::Result;
use async_trait::async_trait;
use mediarelay_core::config::LibraryChannels;
use mediarelay_core::render::{LibraryTitles, MessageContent};
use std::sync::Arc;
use tracing::{debug, error};

/// Publishes a message into one reconciled slot
pub struct SlotSink {
    reconciler: Arc<MessageReconciler>,
    slot: String,
    channel: Option<i64>,
}

impl SlotSink {
    /// Sink for `slot` in `channel`
    pub fn new(
        reconciler: Arc<MessageReconciler>,
        slot: impl Into<String>,
        channel: Option<i64>,
    ) -> Self {
        Self {
            reconciler,
            slot: slot.into(),
            channel,
        }
    }
}

#[async_trait]
impl Sink<MessageContent> for SlotSink {
    async fn publish(&self, item: MessageContent) -> Result<()> {
        let outcome = self.reconciler.reconcile(&self.slot, self.channel, &item).await;
        debug!(slot = %self.slot, outcome = ?outcome, "Reconciled");
        if outcome == ReconcileOutcome::Failed {
            anyhow::bail!("destination rejected the update for slot {}", self.slot);
        }
        Ok(())
    }
}

/// Writes library counts into channel titles
pub struct TitleSink {
    destination: Arc<dyn Destination>,
    channels: LibraryChannels,
}

impl TitleSink {
    /// Sink for the configured library channels
    pub fn new(destination: Arc<dyn Destination>, channels: LibraryChannels) -> Self {
        Self {
            destination,
            channels,
        }
    }
}

#[async_trait]
impl Sink<LibraryTitles> for TitleSink {
    async fn publish(&self, item: LibraryTitles) -> Result<()> {
        let targets = [
            ("movies", self.channels.movies_channel, item.movies),
            ("tv_shows", self.channels.tv_shows_channel, item.tv_shows),
            ("users", self.channels.user_count_channel, item.users),
        ];

        let mut failed = 0;
        for (name, channel, title) in targets {
            let Some(channel) = channel else {
                continue;
            };
            if let Err(e) = self.destination.set_title(channel, &title).await {
                error!(channel_kind = name, channel, error = %e, "Failed to update channel title");
                failed += 1;
            }
        }

        if failed > 0 {
            anyhow::bail!("{failed} channel title update(s) failed");
        }
        Ok(())
    }
}
