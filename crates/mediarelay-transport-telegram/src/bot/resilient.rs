//! Bot API calls with automatic retry.
//!
//! Network and I/O failures are retried through
//! [`mediarelay_core::utils::retry_transport_operation`]; API errors are
//! returned as-is so callers can tell "message gone" from "chat gone".

use mediarelay_core::utils::retry_transport_operation;
use teloxide::prelude::*;
use teloxide::types::{LinkPreviewOptions, Message, MessageId, ParseMode};
use teloxide::{ApiError, RequestError};
use tracing::debug;

/// Returns `true` for failures worth retrying right away
#[must_use]
pub const fn is_transient(error: &RequestError) -> bool {
    matches!(error, RequestError::Network(_) | RequestError::Io(_))
}

/// Returns `true` if the Bot API rejected the token
#[must_use]
pub const fn is_invalid_token(error: &RequestError) -> bool {
    matches!(error, RequestError::Api(ApiError::InvalidToken))
}

fn is_not_modified(error: &RequestError) -> bool {
    match error {
        RequestError::Api(ApiError::MessageNotModified) => true,
        RequestError::Api(ApiError::Unknown(msg)) => msg.contains("not modified"),
        _ => false,
    }
}

/// Preview settings for a message body: the poster when there is one,
/// otherwise previews off
#[must_use]
pub fn preview_options(url: Option<&str>) -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: url.is_none(),
        url: url.map(str::to_string),
        prefer_small_media: false,
        prefer_large_media: url.is_some(),
        show_above_text: false,
    }
}

/// Check that a chat exists and is visible to the bot.
///
/// # Errors
///
/// Returns the request error for anything other than "chat not found".
pub async fn chat_exists(bot: &Bot, chat_id: ChatId) -> Result<bool, RequestError> {
    let lookup =
        retry_transport_operation(|| async { bot.get_chat(chat_id).await }, is_transient).await;
    match lookup {
        Ok(_) => Ok(true),
        Err(RequestError::Api(ApiError::ChatNotFound)) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Send an HTML message with automatic retry on network failures.
///
/// # Errors
///
/// Returns the last request error once retries are exhausted.
pub async fn send_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: &str,
    preview_url: Option<&str>,
) -> Result<Message, RequestError> {
    retry_transport_operation(
        || async {
            bot.send_message(chat_id, text)
                .parse_mode(ParseMode::Html)
                .link_preview_options(preview_options(preview_url))
                .await
        },
        is_transient,
    )
    .await
}

/// Edit an HTML message with automatic retry on network failures.
///
/// "Message is not modified" counts as success.
///
/// # Errors
///
/// Returns the last request error once retries are exhausted.
pub async fn edit_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: &str,
    preview_url: Option<&str>,
) -> Result<(), RequestError> {
    let edited = retry_transport_operation(
        || async {
            bot.edit_message_text(chat_id, msg_id, text)
                .parse_mode(ParseMode::Html)
                .link_preview_options(preview_options(preview_url))
                .await
        },
        is_transient,
    )
    .await;

    match edited {
        Ok(_) => Ok(()),
        Err(e) if is_not_modified(&e) => {
            debug!(chat_id = chat_id.0, msg_id = msg_id.0, "Message is not modified");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Rename a chat with automatic retry on network failures.
///
/// # Errors
///
/// Returns the last request error once retries are exhausted.
pub async fn set_chat_title_resilient(
    bot: &Bot,
    chat_id: ChatId,
    title: &str,
) -> Result<(), RequestError> {
    let renamed = retry_transport_operation(
        || async { bot.set_chat_title(chat_id, title).await },
        is_transient,
    )
    .await;

    match renamed {
        Ok(_) => Ok(()),
        Err(e) if is_not_modified(&e) => Ok(()),
        Err(e) => Err(e),
    }
}
