use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::poll::{PollContent, TargetLocation};

/// The subset of the Bot API that the publisher and the command gate call.
/// A trait seam so both paths can be exercised against a fake in tests.
#[allow(async_fn_in_trait)]
pub trait TelegramApi {
    async fn send_poll(
        &self,
        target: &TargetLocation,
        content: &PollContent,
    ) -> anyhow::Result<i64>;

    async fn pin_message(&self, target: &TargetLocation, message_id: i64) -> anyhow::Result<()>;

    async fn send_message(
        &self,
        chat_id: i64,
        reply_to: Option<i64>,
        text: &str,
    ) -> anyhow::Result<()>;

    async fn get_chat_member_status(&self, chat_id: i64, user_id: i64) -> anyhow::Result<String>;
}

/// Client for the Telegram Bot API.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    bot_token: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

impl TelegramClient {
    pub fn new(http: reqwest::Client, bot_token: String) -> Self {
        Self { http, bot_token }
    }

    fn url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.bot_token, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> anyhow::Result<T> {
        let resp: ApiResponse<T> = self
            .http
            .post(self.url(method))
            .json(body)
            .send()
            .await
            .with_context(|| format!("telegram {method} request"))?
            .json()
            .await
            .with_context(|| format!("telegram {method} decode"))?;

        if !resp.ok {
            anyhow::bail!(
                "telegram {method} failed: {}",
                resp.description
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        resp.result
            .with_context(|| format!("telegram {method} returned no result"))
    }

    pub async fn get_me(&self) -> anyhow::Result<BotProfile> {
        self.call("getMe", &serde_json::json!({})).await
    }

    /// Register `url` as this bot's webhook endpoint.
    pub async fn set_webhook(&self, url: &str, secret_token: Option<&str>) -> anyhow::Result<()> {
        let mut body = serde_json::json!({
            "url": url,
            "allowed_updates": ["message"],
        });
        if let Some(secret) = secret_token {
            body["secret_token"] = secret.into();
        }
        let _: bool = self.call("setWebhook", &body).await?;
        Ok(())
    }
}

impl TelegramApi for TelegramClient {
    async fn send_poll(
        &self,
        target: &TargetLocation,
        content: &PollContent,
    ) -> anyhow::Result<i64> {
        let options: Vec<serde_json::Value> = content
            .options
            .iter()
            .map(|text| serde_json::json!({ "text": text }))
            .collect();
        let body = serde_json::json!({
            "chat_id": target.chat_id,
            "message_thread_id": target.thread_id,
            "question": content.question,
            "options": options,
            "is_anonymous": content.is_anonymous,
            "allows_multiple_answers": content.allows_multiple_answers,
        });
        let sent: SentMessage = self.call("sendPoll", &body).await?;
        Ok(sent.message_id)
    }

    async fn pin_message(&self, target: &TargetLocation, message_id: i64) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "chat_id": target.chat_id,
            "message_id": message_id,
            "disable_notification": true,
        });
        let _: bool = self.call("pinChatMessage", &body).await?;
        Ok(())
    }

    async fn send_message(
        &self,
        chat_id: i64,
        reply_to: Option<i64>,
        text: &str,
    ) -> anyhow::Result<()> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(message_id) = reply_to {
            body["reply_parameters"] = serde_json::json!({ "message_id": message_id });
        }
        let _: SentMessage = self.call("sendMessage", &body).await?;
        Ok(())
    }

    async fn get_chat_member_status(&self, chat_id: i64, user_id: i64) -> anyhow::Result<String> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "user_id": user_id,
        });
        let member: ChatMember = self.call("getChatMember", &body).await?;
        Ok(member.status)
    }
}

// --- Incoming payload types ---

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMember {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotProfile {
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_with_command_message_deserializes() {
        let raw = serde_json::json!({
            "update_id": 873211,
            "message": {
                "message_id": 5915,
                "from": { "id": 42, "is_bot": false, "username": "alice" },
                "chat": { "id": -1002160364008i64, "type": "supergroup", "title": "London Valley" },
                "date": 1756300000,
                "text": "/pollbadminton"
            }
        });
        let update: Update = serde_json::from_value(raw).unwrap();
        let msg = update.message.unwrap();
        assert_eq!(msg.message_id, 5915);
        assert_eq!(msg.chat.id, -1002160364008);
        assert_eq!(msg.text.as_deref(), Some("/pollbadminton"));
        assert_eq!(msg.from.unwrap().id, 42);
    }

    #[test]
    fn update_without_message_deserializes() {
        let raw = serde_json::json!({ "update_id": 873212 });
        let update: Update = serde_json::from_value(raw).unwrap();
        assert!(update.message.is_none());
    }

    #[test]
    fn api_error_envelope_deserializes() {
        let raw = serde_json::json!({
            "ok": false,
            "error_code": 400,
            "description": "Bad Request: chat not found"
        });
        let resp: ApiResponse<SentMessage> = serde_json::from_value(raw).unwrap();
        assert!(!resp.ok);
        assert!(resp.result.is_none());
        assert_eq!(resp.description.as_deref(), Some("Bad Request: chat not found"));
    }
}
