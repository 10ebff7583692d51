//! Telegram Bot API transport.
//!
//! A thin reqwest client for the four methods the bot needs: long-polled
//! `getUpdates`, `sendMessage`, `editMessageText` and `answerCallbackQuery`.

use crate::error::TelegramError;
use async_trait::async_trait;
use pitchside_core::{ChatId, MessageId, UserId};
use pitchside_scheduler::{CollaboratorError, Delivery, DeliveryHandle, OutboundMessage};
use rootcause::prelude::Report;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// One inbound update.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
    pub reply_to_message: Option<Box<Message>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: ChatId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: UserId,
    pub first_name: Option<String>,
}

/// A pressed inline button.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

/// Bot API client.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    client: reqwest::Client,
    base: String,
    poll_timeout: Duration,
}

impl TelegramClient {
    /// Creates a client for the bot identified by `token`.
    pub fn new(api_base: &str, token: &str, poll_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
            poll_timeout,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &Value,
        timeout: Option<Duration>,
    ) -> Result<T, Report<TelegramError>> {
        let request_failed = |e: reqwest::Error| TelegramError::Request {
            method: method.to_string(),
            details: e.to_string(),
        };

        let mut request = self
            .client
            .post(format!("{}/{}", self.base, method))
            .json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response: ApiResponse<T> = request
            .send()
            .await
            .map_err(request_failed)?
            .json()
            .await
            .map_err(request_failed)?;

        match response {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => Err(TelegramError::Api {
                method: method.to_string(),
                description: description.unwrap_or_else(|| "no result".to_string()),
            }
            .into()),
        }
    }

    /// Long-polls for updates after `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, Report<TelegramError>> {
        let body = json!({
            "offset": offset,
            "timeout": self.poll_timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        // The HTTP timeout must outlast the server-side long poll.
        let timeout = self.poll_timeout + Duration::from_secs(10);
        self.call("getUpdates", &body, Some(timeout)).await
    }

    /// Sends a message and returns its id.
    #[instrument(skip(self, message))]
    pub async fn send_message(
        &self,
        chat: ChatId,
        message: &OutboundMessage,
    ) -> Result<MessageId, Report<TelegramError>> {
        let mut body = json!({ "chat_id": chat, "text": message.text });
        if let Some(markup) = reply_markup(message) {
            body["reply_markup"] = markup;
        }
        let sent: Message = self.call("sendMessage", &body, None).await?;
        debug!(message = %sent.message_id, "message sent");
        Ok(sent.message_id)
    }

    /// Replaces the text and keyboard of a message the bot sent.
    #[instrument(skip(self, message))]
    pub async fn edit_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
        message: &OutboundMessage,
    ) -> Result<(), Report<TelegramError>> {
        let body = json!({
            "chat_id": chat,
            "message_id": message_id,
            "text": message.text,
            "reply_markup": reply_markup(message).unwrap_or_else(|| json!({ "inline_keyboard": [] })),
        });
        // The API answers with the edited message, or `true` for inline
        // messages; neither is needed.
        let _: Value = self.call("editMessageText", &body, None).await?;
        Ok(())
    }

    /// Acknowledges a button press, optionally with a toast.
    pub async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), Report<TelegramError>> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        let _: bool = self.call("answerCallbackQuery", &body, None).await?;
        Ok(())
    }
}

/// Inline keyboard markup for a message, if it has buttons.
fn reply_markup(message: &OutboundMessage) -> Option<Value> {
    if message.keyboard.is_empty() {
        return None;
    }
    let rows: Vec<Vec<Value>> = message
        .keyboard
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| json!({ "text": b.label, "callback_data": b.data }))
                .collect()
        })
        .collect();
    Some(json!({ "inline_keyboard": rows }))
}

#[async_trait]
impl Delivery for TelegramClient {
    async fn deliver(
        &self,
        chat: ChatId,
        message: OutboundMessage,
    ) -> Result<DeliveryHandle, Report<CollaboratorError>> {
        match self.send_message(chat, &message).await {
            Ok(message) => Ok(DeliveryHandle { chat, message }),
            Err(e) => {
                warn!(%chat, error = %e, "delivery failed");
                Err(CollaboratorError::DeliveryFailed {
                    chat,
                    reason: e.to_string(),
                }
                .into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitchside_scheduler::Button;

    #[test]
    fn keyboard_rows_become_inline_markup() {
        let message = OutboundMessage::text("How is your energy?")
            .with_row(vec![Button::new("1", "mp:E:1"), Button::new("2", "mp:E:2")])
            .with_row(vec![Button::new("Back", "m:back")]);
        let markup = reply_markup(&message).expect("markup");
        assert_eq!(markup["inline_keyboard"][0][1]["callback_data"], "mp:E:2");
        assert_eq!(markup["inline_keyboard"][1][0]["text"], "Back");
    }

    #[test]
    fn plain_text_has_no_markup() {
        assert!(reply_markup(&OutboundMessage::text("hi")).is_none());
    }

    #[test]
    fn callback_update_deserializes() {
        let raw = json!({
            "update_id": 10,
            "callback_query": {
                "id": "cb1",
                "from": { "id": 7, "first_name": "Ann" },
                "message": { "message_id": 42, "chat": { "id": 500 } },
                "data": "mp:E:8"
            }
        });
        let update: Update = serde_json::from_value(raw).expect("update deserializes");
        let query = update.callback_query.expect("callback query");
        assert_eq!(query.from.id, UserId::new(7));
        assert_eq!(query.message.expect("message").message_id, MessageId::new(42));
        assert_eq!(query.data.as_deref(), Some("mp:E:8"));
    }
}
