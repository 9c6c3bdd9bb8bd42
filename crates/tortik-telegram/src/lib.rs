//! Telegram Bot API client — long polling + message sending.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tortik_core::error::{Result, TortikError};
use tortik_core::{TelegramConfig, Transport};

/// Bot API client with a long-polling cursor.
pub struct TelegramApi {
    config: TelegramConfig,
    client: reqwest::Client,
    last_update_id: i64,
}

impl TelegramApi {
    pub fn new(config: TelegramConfig) -> Self {
        Self { config, client: reqwest::Client::new(), last_update_id: 0 }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.config.bot_token, method)
    }

    /// Get updates using long polling.
    pub async fn get_updates(&mut self) -> Result<Vec<Update>> {
        let response = self
            .client
            .get(self.api_url("getUpdates"))
            .query(&[
                ("offset", (self.last_update_id + 1).to_string()),
                ("timeout", self.config.poll_timeout_secs.to_string()),
                ("allowed_updates", "[\"message\"]".into()),
            ])
            // The server holds the request open for the poll window.
            .timeout(Duration::from_secs(self.config.poll_timeout_secs + 10))
            .send()
            .await
            .map_err(|e| TortikError::Telegram(format!("getUpdates failed: {e}")))?;

        let body: ApiResponse<Vec<Update>> = response
            .json()
            .await
            .map_err(|e| TortikError::Telegram(format!("Invalid getUpdates response: {e}")))?;

        if !body.ok {
            return Err(TortikError::Telegram(format!(
                "Telegram API error: {}",
                body.description.unwrap_or_default()
            )));
        }

        let updates = body.result.unwrap_or_default();
        if let Some(last) = updates.last() {
            self.last_update_id = last.update_id;
        }
        Ok(updates)
    }

    /// Send a plain-text message.
    pub async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .timeout(Duration::from_secs(self.config.send_timeout_secs))
            .send()
            .await
            .map_err(|e| TortikError::Telegram(format!("sendMessage failed: {e}")))?;

        let result: ApiResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| TortikError::Telegram(format!("Invalid send response: {e}")))?;

        if !result.ok {
            return Err(TortikError::Telegram(format!(
                "Send failed: {}",
                result.description.unwrap_or_default()
            )));
        }
        Ok(())
    }

    /// Get bot info.
    pub async fn get_me(&self) -> Result<User> {
        let response = self
            .client
            .get(self.api_url("getMe"))
            .timeout(Duration::from_secs(self.config.send_timeout_secs))
            .send()
            .await
            .map_err(|e| TortikError::Telegram(format!("getMe failed: {e}")))?;
        let body: ApiResponse<User> = response
            .json()
            .await
            .map_err(|e| TortikError::Telegram(format!("Invalid getMe response: {e}")))?;
        body.result.ok_or_else(|| TortikError::Telegram("No bot info".into()))
    }

    /// Start the polling loop — returns a stream of human text messages.
    pub fn start_polling(self) -> TelegramPollingStream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut api = self;
            tracing::info!("Telegram polling loop started");

            loop {
                match api.get_updates().await {
                    Ok(updates) => {
                        for update in updates {
                            if let Some(msg) = update.into_message()
                                && tx.send(msg).is_err()
                            {
                                tracing::info!("Telegram polling stopped (receiver dropped)");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("Telegram polling error: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        TelegramPollingStream { rx }
    }
}

/// Stream of incoming Telegram messages from polling.
pub struct TelegramPollingStream {
    rx: tokio::sync::mpsc::UnboundedReceiver<Message>,
}

impl Stream for TelegramPollingStream {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Unpin for TelegramPollingStream {}

#[async_trait]
impl Transport for TelegramApi {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        self.send_text(chat_id, text).await
    }
}

// --- Telegram API Types ---

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    pub date: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
    pub title: Option<String>,
}

impl Update {
    /// Keep only text messages written by humans.
    pub fn into_message(self) -> Option<Message> {
        let msg = self.message?;
        msg.text.as_ref()?;
        let from = msg.from.as_ref()?;
        if from.is_bot {
            return None;
        }
        Some(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPDATES_JSON: &str = r#"{
        "ok": true,
        "result": [
            {
                "update_id": 901,
                "message": {
                    "message_id": 42,
                    "from": {"id": 7, "is_bot": false, "first_name": "Аня", "username": "anya"},
                    "chat": {"id": -100500, "type": "group", "title": "Друзья"},
                    "text": "/add",
                    "date": 1760000000
                }
            },
            {
                "update_id": 902,
                "message": {
                    "message_id": 43,
                    "from": {"id": 8, "is_bot": true, "first_name": "OtherBot"},
                    "chat": {"id": -100500, "type": "group", "title": "Друзья"},
                    "text": "beep",
                    "date": 1760000001
                }
            },
            {
                "update_id": 903,
                "message": {
                    "message_id": 44,
                    "from": {"id": 7, "is_bot": false, "first_name": "Аня", "username": "anya"},
                    "chat": {"id": -100500, "type": "group", "title": "Друзья"},
                    "date": 1760000002
                }
            }
        ]
    }"#;

    #[test]
    fn test_decode_get_updates_response() {
        let body: ApiResponse<Vec<Update>> = serde_json::from_str(UPDATES_JSON).unwrap();
        assert!(body.ok);
        let updates = body.result.unwrap();
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[0].update_id, 901);

        let msg = updates[0].message.as_ref().unwrap();
        assert_eq!(msg.chat.id, -100500);
        assert_eq!(msg.chat.chat_type, "group");
        assert_eq!(msg.text.as_deref(), Some("/add"));
        assert_eq!(msg.from.as_ref().unwrap().username.as_deref(), Some("anya"));
    }

    #[test]
    fn test_into_message_filters_bots_and_non_text() {
        let body: ApiResponse<Vec<Update>> = serde_json::from_str(UPDATES_JSON).unwrap();
        let updates = body.result.unwrap();

        let kept: Vec<Message> =
            updates.into_iter().filter_map(Update::into_message).collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].message_id, 42);
    }

    #[test]
    fn test_decode_api_error_response() {
        let body: ApiResponse<Vec<Update>> = serde_json::from_str(
            r#"{"ok": false, "description": "Unauthorized"}"#,
        )
        .unwrap();
        assert!(!body.ok);
        assert!(body.result.is_none());
        assert_eq!(body.description.as_deref(), Some("Unauthorized"));
    }
}
