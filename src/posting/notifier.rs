//! Operator notifications for queue items that are due.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::callbacks::{
    action_buttons, confirm_reject_buttons, ActionReply, CallbackBatch, CallbackSource,
    OperatorCallback,
};
use crate::config::TelegramConfig;
use crate::db::{MediaItem, QueueItem};
use crate::error::StorylineError;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Everything a notifier needs to describe one due item.
#[derive(Debug, Clone)]
pub struct Notification<'a> {
    pub queue_item_id: i64,
    pub scheduled_for: DateTime<Utc>,
    pub media: &'a MediaItem,
    /// Tenant chat; `None` uses the notifier's default.
    pub chat_id: Option<i64>,
    /// Sent out of schedule order by force-post-next.
    pub forced: bool,
}

impl<'a> Notification<'a> {
    pub fn new(item: &QueueItem, media: &'a MediaItem, chat_id: Option<i64>, forced: bool) -> Self {
        Self {
            queue_item_id: item.id,
            scheduled_for: item.scheduled_for,
            media,
            chat_id,
            forced,
        }
    }

    pub fn text(&self) -> String {
        let heading = if self.forced {
            "Post now (moved to the front of the queue)".to_string()
        } else {
            format!("Story due at {}", self.scheduled_for.format("%Y-%m-%d %H:%M UTC"))
        };
        let mut text = format!("{}\n{}", heading, self.media.file_name);
        if let Some(ref category) = self.media.category {
            text.push_str(&format!("\nCategory: {}", category));
        }
        if self.media.times_posted > 0 {
            text.push_str(&format!("\nPosted {} time(s) before", self.media.times_posted));
        }
        text
    }
}

/// Delivers notifications and returns the id of the sent message, which is
/// bound to the queue item so it is not announced twice.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification<'_>) -> Result<i64>;
}

#[derive(Debug, Serialize)]
struct InlineButton {
    text: &'static str,
    callback_data: String,
}

#[derive(Debug, Serialize)]
struct InlineKeyboard {
    inline_keyboard: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    fn from_rows(rows: Vec<Vec<(&'static str, String)>>) -> Self {
        let inline_keyboard = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|(text, callback_data)| InlineButton { text, callback_data })
                    .collect()
            })
            .collect();
        Self { inline_keyboard }
    }

    /// Buttons left on the message after `reply`; `None` leaves them as is.
    fn after(reply: &ActionReply) -> Option<Self> {
        match reply {
            ActionReply::Resolved(_) | ActionReply::AlreadyResolved => Some(Self::from_rows(Vec::new())),
            ActionReply::ConfirmReject(id) => Some(Self::from_rows(confirm_reject_buttons(*id))),
            ActionReply::Restore(id) => Some(Self::from_rows(action_buttons(*id))),
            ActionReply::Ignored => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct SendMessageRequest {
    chat_id: i64,
    text: String,
    reply_markup: InlineKeyboard,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    offset: i64,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

#[derive(Debug, Serialize)]
struct AnswerCallbackRequest<'a> {
    callback_query_id: &'a str,
    text: &'static str,
}

#[derive(Debug, Serialize)]
struct EditMarkupRequest {
    chat_id: i64,
    message_id: i64,
    reply_markup: InlineKeyboard,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    from: User,
    #[serde(default)]
    message: Option<CallbackMessage>,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallbackMessage {
    message_id: i64,
    chat: Chat,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

impl<T> ApiResponse<T> {
    fn into_result(self, method: &str) -> Result<T> {
        match self {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => Err(anyhow!(
                "Telegram {} rejected: {}",
                method,
                description.unwrap_or_else(|| "unknown error".to_string())
            )),
        }
    }
}

fn batch_from_updates(updates: Vec<Update>) -> CallbackBatch {
    let next_offset = updates.iter().map(|u| u.update_id + 1).max();
    let callbacks = updates
        .into_iter()
        .filter_map(|u| u.callback_query)
        .map(|query| OperatorCallback {
            callback_id: query.id,
            chat_id: query.message.as_ref().map(|m| m.chat.id),
            message_id: query.message.as_ref().map(|m| m.message_id),
            actor: Some(query.from.username.unwrap_or_else(|| query.from.id.to_string())),
            data: query.data,
        })
        .collect();
    CallbackBatch {
        next_offset,
        callbacks,
    }
}

pub struct TelegramNotifier {
    bot_token: String,
    default_chat_id: Option<i64>,
    agent: ureq::Agent,
}

impl TelegramNotifier {
    pub fn from_config(config: &TelegramConfig) -> Result<Self, StorylineError> {
        let bot_token = config
            .bot_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| StorylineError::InvalidConfig("telegram.bot_token is not set".to_string()))?;
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Ok(Self {
            bot_token,
            default_chat_id: config.default_chat_id,
            agent,
        })
    }

    fn request_for(&self, notification: &Notification<'_>) -> Result<SendMessageRequest> {
        let chat_id = notification
            .chat_id
            .or(self.default_chat_id)
            .ok_or_else(|| anyhow!("no Telegram chat configured for this queue item"))?;
        Ok(SendMessageRequest {
            chat_id,
            text: notification.text(),
            reply_markup: InlineKeyboard::from_rows(action_buttons(notification.queue_item_id)),
        })
    }

    fn call<T: DeserializeOwned>(&self, method: &str, body: &impl Serialize) -> Result<T> {
        let url = format!("{}/bot{}/{}", TELEGRAM_API_BASE, self.bot_token, method);
        let response: ApiResponse<T> = self
            .agent
            .post(&url)
            .send_json(body)
            .map_err(|e| anyhow!("Telegram {} failed: {}", method, e))?
            .into_json()
            .map_err(|e| anyhow!("Failed to parse Telegram response: {}", e))?;
        response.into_result(method)
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, notification: &Notification<'_>) -> Result<i64> {
        let request = self.request_for(notification)?;
        let message: SentMessage = self.call("sendMessage", &request)?;
        Ok(message.message_id)
    }
}

impl CallbackSource for TelegramNotifier {
    fn poll_callbacks(&self, offset: i64) -> Result<CallbackBatch> {
        let updates: Vec<Update> = self.call(
            "getUpdates",
            &GetUpdatesRequest {
                offset,
                timeout: 0,
                allowed_updates: ["callback_query"],
            },
        )?;
        Ok(batch_from_updates(updates))
    }

    fn reply(&self, callback: &OperatorCallback, reply: &ActionReply) -> Result<()> {
        let _: bool = self.call(
            "answerCallbackQuery",
            &AnswerCallbackRequest {
                callback_query_id: &callback.callback_id,
                text: reply.text(),
            },
        )?;

        let (Some(chat_id), Some(message_id), Some(reply_markup)) =
            (callback.chat_id, callback.message_id, InlineKeyboard::after(reply))
        else {
            return Ok(());
        };
        // Returns the edited message, which is not needed.
        let _: serde_json::Value = self.call(
            "editMessageReplyMarkup",
            &EditMarkupRequest {
                chat_id,
                message_id,
                reply_markup,
            },
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SourceType;
    use chrono::TimeZone;

    fn media() -> MediaItem {
        MediaItem {
            id: 3,
            file_path: "p/cat.jpg".to_string(),
            file_name: "cat.jpg".to_string(),
            file_hash: "h".to_string(),
            file_size: 1,
            mime_type: None,
            category: Some("memes".to_string()),
            source_type: SourceType::Local,
            source_identifier: "p/cat.jpg".to_string(),
            is_active: true,
            times_posted: 0,
            last_posted_at: None,
            tenant_id: None,
        }
    }

    fn notification(media: &MediaItem, chat_id: Option<i64>) -> Notification<'_> {
        Notification {
            queue_item_id: 42,
            scheduled_for: Utc.with_ymd_and_hms(2026, 6, 1, 9, 30, 0).unwrap(),
            media,
            chat_id,
            forced: false,
        }
    }

    #[test]
    fn test_message_text() {
        let media = media();
        let text = notification(&media, None).text();
        assert!(text.starts_with("Story due at 2026-06-01 09:30 UTC"));
        assert!(text.contains("cat.jpg"));
        assert!(text.contains("Category: memes"));
    }

    #[test]
    fn test_request_uses_tenant_chat_then_default() {
        let notifier = TelegramNotifier::from_config(&TelegramConfig {
            bot_token: Some("123:abc".to_string()),
            default_chat_id: Some(-1),
            timeout_secs: 5,
        })
        .unwrap();
        let media = media();

        let request = notifier.request_for(&notification(&media, Some(-100))).unwrap();
        assert_eq!(request.chat_id, -100);
        let request = notifier.request_for(&notification(&media, None)).unwrap();
        assert_eq!(request.chat_id, -1);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json["reply_markup"]["inline_keyboard"][0][2]["callback_data"],
            "reject:42"
        );
    }

    #[test]
    fn test_missing_token_is_invalid_config() {
        assert!(TelegramNotifier::from_config(&TelegramConfig::default()).is_err());
    }

    #[test]
    fn test_error_response_parses() {
        let response: ApiResponse<SentMessage> =
            serde_json::from_str(r#"{"ok":false,"description":"chat not found"}"#).unwrap();
        let err = response.into_result("sendMessage").unwrap_err();
        assert!(err.to_string().contains("chat not found"));
    }

    #[test]
    fn test_updates_become_callbacks() {
        let response: ApiResponse<Vec<Update>> = serde_json::from_str(
            r#"{"ok":true,"result":[
                {"update_id":7,"message":{"message_id":1}},
                {"update_id":8,"callback_query":{
                    "id":"cb1",
                    "from":{"id":55,"username":"alice"},
                    "message":{"message_id":900,"chat":{"id":-100}},
                    "data":"skip:42"}},
                {"update_id":9,"callback_query":{"id":"cb2","from":{"id":56}}}
            ]}"#,
        )
        .unwrap();
        let batch = batch_from_updates(response.into_result("getUpdates").unwrap());

        assert_eq!(batch.next_offset, Some(10));
        assert_eq!(batch.callbacks.len(), 2);
        assert_eq!(
            batch.callbacks[0],
            OperatorCallback {
                callback_id: "cb1".to_string(),
                chat_id: Some(-100),
                message_id: Some(900),
                actor: Some("alice".to_string()),
                data: Some("skip:42".to_string()),
            }
        );
        assert_eq!(batch.callbacks[1].actor.as_deref(), Some("56"));
        assert_eq!(batch.callbacks[1].message_id, None);
    }

    #[test]
    fn test_empty_poll_keeps_offset() {
        assert_eq!(batch_from_updates(Vec::new()), CallbackBatch::default());
    }

    #[test]
    fn test_buttons_after_reply() {
        let json = |reply| serde_json::to_value(InlineKeyboard::after(&reply)).unwrap();
        assert_eq!(
            json(ActionReply::ConfirmReject(42))["inline_keyboard"][0][0]["callback_data"],
            "reject_confirm:42"
        );
        assert_eq!(
            json(ActionReply::Restore(42))["inline_keyboard"][0][2]["callback_data"],
            "reject:42"
        );
        assert_eq!(
            json(ActionReply::Resolved("Skipped"))["inline_keyboard"],
            serde_json::json!([])
        );
        assert!(InlineKeyboard::after(&ActionReply::Ignored).is_none());
    }
}
