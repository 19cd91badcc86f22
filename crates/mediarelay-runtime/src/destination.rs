use async_trait::async_trait;
use mediarelay_core::render::MessageContent;
use mediarelay_core::slots::MessageId;
use thiserror::Error;

/// Errors reported by a destination transport
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DestinationError {
    /// The channel does not exist or the bot cannot see it
    #[error("channel {0} not found")]
    ChannelNotFound(i64),
    /// The message was deleted or never existed
    #[error("message {0} not found")]
    MessageNotFound(MessageId),
    /// The credential was revoked or lacks rights for the call
    #[error("not authorized: {0}")]
    Unauthorized(String),
    /// Any other transport failure
    #[error("transport error: {0}")]
    Transport(String),
}

/// Chat service the summaries are mirrored into.
///
/// Implementations treat "content unchanged" edits as success.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Destination: Send + Sync {
    /// Returns `false` if the channel is unknown to the transport
    async fn channel_exists(&self, channel: i64) -> Result<bool, DestinationError>;

    /// Post a new message and return its identity
    async fn send(&self, channel: i64, content: &MessageContent)
        -> Result<MessageId, DestinationError>;

    /// Replace the content of an existing message
    async fn edit(
        &self,
        channel: i64,
        message: MessageId,
        content: &MessageContent,
    ) -> Result<(), DestinationError>;

    /// Rename a channel
    async fn set_title(&self, channel: i64, title: &str) -> Result<(), DestinationError>;
}
