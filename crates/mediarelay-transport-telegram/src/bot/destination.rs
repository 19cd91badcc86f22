use super::resilient::{
    chat_exists, edit_message_resilient, is_invalid_token, send_message_resilient,
    set_chat_title_resilient,
};
use async_trait::async_trait;
use mediarelay_core::render::MessageContent;
use mediarelay_core::slots::MessageId;
use mediarelay_runtime::{Destination, DestinationError};
use teloxide::prelude::*;
use teloxide::types::MessageId as TgMessageId;
use teloxide::{ApiError, RequestError};

/// Telegram chats as a [`Destination`]
#[derive(Clone)]
pub struct TelegramDestination {
    bot: Bot,
}

impl TelegramDestination {
    /// Destination writing through `bot`
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn map_error(error: RequestError) -> DestinationError {
    if is_invalid_token(&error) {
        return DestinationError::Unauthorized(error.to_string());
    }
    DestinationError::Transport(error.to_string())
}

#[async_trait]
impl Destination for TelegramDestination {
    async fn channel_exists(&self, channel: i64) -> Result<bool, DestinationError> {
        chat_exists(&self.bot, ChatId(channel))
            .await
            .map_err(map_error)
    }

    async fn send(
        &self,
        channel: i64,
        content: &MessageContent,
    ) -> Result<MessageId, DestinationError> {
        let message = send_message_resilient(
            &self.bot,
            ChatId(channel),
            &content.text,
            content.preview_url.as_deref(),
        )
        .await
        .map_err(|e| match e {
            RequestError::Api(ApiError::ChatNotFound) => DestinationError::ChannelNotFound(channel),
            other => map_error(other),
        })?;
        Ok(MessageId(i64::from(message.id.0)))
    }

    async fn edit(
        &self,
        channel: i64,
        message: MessageId,
        content: &MessageContent,
    ) -> Result<(), DestinationError> {
        // Telegram message ids are 32-bit; anything else cannot exist
        let Ok(raw) = i32::try_from(message.0) else {
            return Err(DestinationError::MessageNotFound(message));
        };

        edit_message_resilient(
            &self.bot,
            ChatId(channel),
            TgMessageId(raw),
            &content.text,
            content.preview_url.as_deref(),
        )
        .await
        .map_err(|e| match e {
            RequestError::Api(ApiError::MessageToEditNotFound) => {
                DestinationError::MessageNotFound(message)
            }
            other => map_error(other),
        })
    }

    async fn set_title(&self, channel: i64, title: &str) -> Result<(), DestinationError> {
        set_chat_title_resilient(&self.bot, ChatId(channel), title)
            .await
            .map_err(|e| match e {
                RequestError::Api(ApiError::ChatNotFound) => {
                    DestinationError::ChannelNotFound(channel)
                }
                other => map_error(other),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_token_maps_to_unauthorized() {
        let mapped = map_error(RequestError::Api(ApiError::InvalidToken));
        assert!(matches!(mapped, DestinationError::Unauthorized(_)));
    }

    #[test]
    fn test_other_errors_map_to_transport() {
        let mapped = map_error(RequestError::Api(ApiError::Unknown(
            "Bad Request: not enough rights".to_string(),
        )));
        let DestinationError::Transport(reason) = mapped else {
            panic!("expected a transport error");
        };
        assert!(reason.contains("not enough rights"));
    }
}
