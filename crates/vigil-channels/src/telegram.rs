//! Telegram channel adapter.
//!
//! Uses the Bot HTTP API: `sendMessage` / `editMessageText` /
//! `editMessageReplyMarkup` for delivery and `getUpdates` long-polling for
//! interactive button callbacks. Messages are truncated to Telegram's
//! 4096-character limit with a notice.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::warn;

use vigil_types::{Result, VigilError};

use crate::config::Channel;
use crate::format::truncate_with_notice;
use crate::traits::{
    Credentials, FieldSpec, InteractiveMessage, NotificationProvider, ProviderSchema, SendOptions,
    SendOutcome,
};

const MAX_MESSAGE_LEN: usize = 4096;
const TELEGRAM_API: &str = "https://api.telegram.org/bot";

/// One long-poll update, reduced to what the poller routes on.
#[derive(Debug, Clone)]
pub enum TelegramUpdate {
    Callback {
        update_id: i64,
        callback_id: String,
        data: String,
        chat_id: String,
        message_id: String,
    },
    Message {
        update_id: i64,
        chat_id: String,
        text: String,
    },
    Other {
        update_id: i64,
    },
}

impl TelegramUpdate {
    pub fn update_id(&self) -> i64 {
        match self {
            TelegramUpdate::Callback { update_id, .. }
            | TelegramUpdate::Message { update_id, .. }
            | TelegramUpdate::Other { update_id } => *update_id,
        }
    }
}

pub struct TelegramProvider {
    client: Client,
    api_base: String,
}

impl TelegramProvider {
    pub fn new() -> Self {
        Self::with_api_base(TELEGRAM_API.to_string())
    }

    /// Point the adapter at a different API root (tests).
    pub fn with_api_base(api_base: String) -> Self {
        Self {
            // Longer than the 30s long-poll so getUpdates can ride it out.
            client: Client::builder()
                .timeout(Duration::from_secs(40))
                .build()
                .unwrap_or_default(),
            api_base,
        }
    }

    fn api_url(&self, credentials: &Credentials, method: &str) -> String {
        let token = credentials
            .get("bot_token")
            .map(String::as_str)
            .unwrap_or_default();
        format!("{}{}/{}", self.api_base, token, method)
    }

    async fn call(&self, credentials: &Credentials, method: &str, body: Value) -> Result<Value> {
        let resp = self
            .client
            .post(self.api_url(credentials, method))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.provider_err(format!("{method} request failed: {e}")))?;
        let status = resp.status();
        let value: Value = resp
            .json()
            .await
            .map_err(|e| self.provider_err(format!("{method} returned non-JSON: {e}")))?;
        let ok = value.get("ok").and_then(Value::as_bool).unwrap_or(false);
        if !status.is_success() || !ok {
            let detail = value
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown API error");
            return Err(self.provider_err(format!("{method} failed ({status}): {detail}")));
        }
        Ok(value)
    }

    fn provider_err(&self, detail: String) -> VigilError {
        VigilError::Provider {
            provider: "telegram".into(),
            detail,
        }
    }

    fn chat_id(&self, channel: &Channel) -> Result<String> {
        channel
            .config_str("chat_id")
            .ok_or_else(|| self.provider_err(format!("channel '{}' has no chat_id", channel.id)))
    }

    /// Long-poll for updates after `offset`. The caller owns the cursor and
    /// only advances it once a batch is processed.
    pub async fn get_updates(
        &self,
        credentials: &Credentials,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<TelegramUpdate>> {
        let body = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["callback_query", "message"],
        });
        let value = self.call(credentials, "getUpdates", body).await?;
        let mut out = Vec::new();
        let updates = value
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for update in updates {
            let update_id = update.get("update_id").and_then(Value::as_i64).unwrap_or(0);
            if let Some(cb) = update.get("callback_query") {
                out.push(TelegramUpdate::Callback {
                    update_id,
                    callback_id: cb.get("id").and_then(Value::as_str).unwrap_or_default().into(),
                    data: cb.get("data").and_then(Value::as_str).unwrap_or_default().into(),
                    chat_id: cb["message"]["chat"]["id"]
                        .as_i64()
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                    message_id: cb["message"]["message_id"]
                        .as_i64()
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                });
            } else if let Some(msg) = update.get("message") {
                let text = msg.get("text").and_then(Value::as_str).unwrap_or_default();
                out.push(TelegramUpdate::Message {
                    update_id,
                    chat_id: msg["chat"]["id"].as_i64().map(|v| v.to_string()).unwrap_or_default(),
                    text: text.to_string(),
                });
            } else {
                out.push(TelegramUpdate::Other { update_id });
            }
        }
        Ok(out)
    }

    /// Ack a button press so the client stops its spinner.
    pub async fn answer_callback(
        &self,
        credentials: &Credentials,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<()> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        self.call(credentials, "answerCallbackQuery", body).await?;
        Ok(())
    }

    /// Plain text send to an explicit chat, used by the poller to prompt for
    /// discussion feedback.
    pub async fn send_to_chat(
        &self,
        credentials: &Credentials,
        chat_id: &str,
        text: &str,
    ) -> Result<()> {
        let body = json!({
            "chat_id": chat_id,
            "text": truncate_with_notice(text, MAX_MESSAGE_LEN),
            "parse_mode": "HTML",
        });
        self.call(credentials, "sendMessage", body).await?;
        Ok(())
    }
}

impl Default for TelegramProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationProvider for TelegramProvider {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn display_name(&self) -> &'static str {
        "Telegram"
    }

    fn schema(&self) -> ProviderSchema {
        ProviderSchema {
            name: "telegram",
            display_name: "Telegram",
            description: "Send notifications via the Telegram Bot API",
            required_credentials: vec![FieldSpec {
                name: "bot_token",
                description: "Bot token from @BotFather (e.g. 123456:ABC-DEF...)",
                sensitive: true,
                default: None,
            }],
            required_config: vec![FieldSpec {
                name: "chat_id",
                description: "Chat/group/channel id (e.g. -1001234567890)",
                sensitive: false,
                default: None,
            }],
            optional_config: vec![
                FieldSpec {
                    name: "parse_mode",
                    description: "Message format (HTML)",
                    sensitive: false,
                    default: Some("HTML"),
                },
                FieldSpec {
                    name: "disable_notification",
                    description: "Send silently, without a notification sound",
                    sensitive: false,
                    default: Some("false"),
                },
            ],
        }
    }

    fn supports_interactive(&self) -> bool {
        true
    }

    fn supports_editing(&self) -> bool {
        true
    }

    fn validate_config(
        &self,
        config: &HashMap<String, serde_json::Value>,
    ) -> std::result::Result<(), String> {
        let Some(chat_id) = config.get("chat_id") else {
            return Err("chat_id is required".into());
        };
        let ok = match chat_id {
            Value::Number(n) => n.is_i64(),
            Value::String(s) => s.parse::<i64>().is_ok(),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err("chat_id must be a valid integer".into())
        }
    }

    fn validate_credentials(&self, credentials: &Credentials) -> std::result::Result<(), String> {
        let Some(token) = credentials.get("bot_token") else {
            return Err("bot_token is required".into());
        };
        // Shape: <digits>:<token body>
        let Some((id, rest)) = token.split_once(':') else {
            return Err("bot_token format is invalid (expected 123456:ABC-DEF...)".into());
        };
        if id.is_empty()
            || rest.is_empty()
            || !id.chars().all(|c| c.is_ascii_digit())
            || !rest
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err("bot_token format is invalid (expected 123456:ABC-DEF...)".into());
        }
        Ok(())
    }

    async fn send(
        &self,
        channel: &Channel,
        credentials: &Credentials,
        text: &str,
        opts: &SendOptions,
    ) -> Result<SendOutcome> {
        let chat_id = self.chat_id(channel)?;
        let text = truncate_with_notice(text, MAX_MESSAGE_LEN);

        if let Some(message_id) = &opts.message_id {
            let body = json!({
                "chat_id": chat_id,
                "message_id": message_id.parse::<i64>().unwrap_or_default(),
                "text": text,
                "parse_mode": "HTML",
            });
            self.call(credentials, "editMessageText", body).await?;
            return Ok(SendOutcome {
                success: true,
                message_id: Some(message_id.clone()),
                chat_id: Some(chat_id),
            });
        }

        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_notification": opts.disable_notification,
        });
        let value = self.call(credentials, "sendMessage", body).await?;
        Ok(SendOutcome {
            success: true,
            message_id: value["result"]["message_id"].as_i64().map(|v| v.to_string()),
            chat_id: Some(chat_id),
        })
    }

    async fn send_interactive(
        &self,
        channel: &Channel,
        credentials: &Credentials,
        message: &InteractiveMessage,
    ) -> Result<SendOutcome> {
        let chat_id = self.chat_id(channel)?;
        let keyboard: Vec<Value> = message
            .buttons
            .iter()
            .map(|b| json!({ "text": b.label, "callback_data": b.callback_data }))
            .collect();
        let body = json!({
            "chat_id": chat_id,
            "text": truncate_with_notice(&message.text, MAX_MESSAGE_LEN),
            "parse_mode": "HTML",
            "reply_markup": { "inline_keyboard": [keyboard] },
        });
        let value = self.call(credentials, "sendMessage", body).await?;
        Ok(SendOutcome {
            success: true,
            message_id: value["result"]["message_id"].as_i64().map(|v| v.to_string()),
            chat_id: Some(chat_id),
        })
    }

    async fn edit(
        &self,
        channel: &Channel,
        credentials: &Credentials,
        message_id: &str,
        text: &str,
    ) -> Result<()> {
        let body = json!({
            "chat_id": self.chat_id(channel)?,
            "message_id": message_id.parse::<i64>().unwrap_or_default(),
            "text": truncate_with_notice(text, MAX_MESSAGE_LEN),
            "parse_mode": "HTML",
        });
        self.call(credentials, "editMessageText", body).await?;
        Ok(())
    }

    async fn remove_buttons(
        &self,
        channel: &Channel,
        credentials: &Credentials,
        message_id: &str,
        new_text: Option<&str>,
    ) -> Result<()> {
        match new_text {
            // Replacing the text drops the inline keyboard with it.
            Some(text) => self.edit(channel, credentials, message_id, text).await,
            None => {
                let body = json!({
                    "chat_id": self.chat_id(channel)?,
                    "message_id": message_id.parse::<i64>().unwrap_or_default(),
                    "reply_markup": {},
                });
                self.call(credentials, "editMessageReplyMarkup", body).await?;
                Ok(())
            }
        }
    }

    async fn test_connection(
        &self,
        channel: &Channel,
        credentials: &Credentials,
    ) -> (bool, String) {
        if let Err(e) = self.validate_credentials(credentials) {
            return (false, e);
        }
        if let Err(e) = self.validate_config(&channel.config) {
            return (false, e);
        }
        match self.call(credentials, "getMe", json!({})).await {
            Ok(value) => {
                let username = value["result"]["username"].as_str().unwrap_or("unknown");
                match self.chat_id(channel) {
                    Ok(chat_id) => {
                        let chat =
                            self.call(credentials, "getChat", json!({ "chat_id": chat_id })).await;
                        match chat {
                            Ok(info) => {
                                let title = info["result"]["title"]
                                    .as_str()
                                    .or_else(|| info["result"]["username"].as_str())
                                    .unwrap_or("private chat");
                                (true, format!("Connected as @{username}, chat: {title}"))
                            }
                            Err(e) => {
                                warn!("telegram getChat failed during test: {e}");
                                (false, format!("Bot @{username} ok, but chat unreachable: {e}"))
                            }
                        }
                    }
                    Err(e) => (false, e.to_string()),
                }
            }
            Err(e) => (false, format!("Connection failed: {e}")),
        }
    }
}
