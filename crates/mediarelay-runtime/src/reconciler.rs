//! Keeps one live message per slot
//!
//! Edits the remembered message when possible and falls back to posting a new
//! one (and remembering it) when the old one is gone.

use crate::destination::{Destination, DestinationError};
use mediarelay_core::render::MessageContent;
use mediarelay_core::slots::{MessageId, SlotStore};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What a reconcile call did; informational only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No channel configured or channel not found
    Skipped,
    /// First message for the slot was posted
    Created(MessageId),
    /// The remembered message was updated in place
    Edited(MessageId),
    /// The remembered message was gone and a new one was posted
    Recreated {
        /// Identity that no longer exists
        previous: MessageId,
        /// Identity now remembered for the slot
        current: MessageId,
    },
    /// The destination rejected the call; logged
    Failed,
}

/// Create-or-edit logic over a [`Destination`] and a [`SlotStore`]
pub struct MessageReconciler {
    destination: Arc<dyn Destination>,
    slots: Arc<SlotStore>,
}

impl MessageReconciler {
    /// Create a reconciler writing through `destination`
    pub fn new(destination: Arc<dyn Destination>, slots: Arc<SlotStore>) -> Self {
        Self { destination, slots }
    }

    /// Make `content` the single live message of `slot` in `channel`.
    ///
    /// Never returns an error; failures are logged and reported as
    /// [`ReconcileOutcome::Failed`].
    pub async fn reconcile(
        &self,
        slot: &str,
        channel: Option<i64>,
        content: &MessageContent,
    ) -> ReconcileOutcome {
        let Some(channel) = channel else {
            debug!(slot, "No channel configured, skipping");
            return ReconcileOutcome::Skipped;
        };

        match self.destination.channel_exists(channel).await {
            Ok(true) => {}
            Ok(false) => {
                error!(slot, channel, "Channel not found");
                return ReconcileOutcome::Skipped;
            }
            Err(e) => {
                warn!(slot, channel, error = %e, "Channel lookup failed");
                return ReconcileOutcome::Failed;
            }
        }

        let Some(previous) = self.slots.get(slot).await else {
            return self
                .create(slot, channel, content)
                .await
                .map_or(ReconcileOutcome::Failed, ReconcileOutcome::Created);
        };

        match self.destination.edit(channel, previous, content).await {
            Ok(()) => {
                debug!(slot, message_id = %previous, "Message updated");
                ReconcileOutcome::Edited(previous)
            }
            Err(DestinationError::MessageNotFound(_)) => {
                info!(slot, message_id = %previous, "Message gone, posting a new one");
                self.create(slot, channel, content)
                    .await
                    .map_or(ReconcileOutcome::Failed, |current| {
                        ReconcileOutcome::Recreated { previous, current }
                    })
            }
            Err(e) => {
                error!(slot, message_id = %previous, error = %e, "Edit failed");
                ReconcileOutcome::Failed
            }
        }
    }

    async fn create(
        &self,
        slot: &str,
        channel: i64,
        content: &MessageContent,
    ) -> Option<MessageId> {
        let id = match self.destination.send(channel, content).await {
            Ok(id) => id,
            Err(e) => {
                error!(slot, channel, error = %e, "Post failed");
                return None;
            }
        };

        if let Err(e) = self.slots.remember(slot, id).await {
            error!(
                slot,
                message_id = %id,
                path = %self.slots.path().display(),
                error = %e,
                "Failed to persist slot identities"
            );
        }
        Some(id)
    }
}
