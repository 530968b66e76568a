//! Telegram Bot API client.
//!
//! Plain JSON-over-HTTP against `api.telegram.org`; implements the
//! bridge's `ChannelApi` boundary plus the `getUpdates` long poll the
//! poller drives.

use async_trait::async_trait;
use courier_bridge::channel::{
    ChannelApi, ChannelError, ChatId, DeliveryMode, MessageId, PresenceKind,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

pub struct TelegramApi {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramApi {
    pub fn new(token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("{TELEGRAM_API_BASE}/bot{token}"),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &Value,
    ) -> Result<T, ChannelError> {
        let url = format!("{}/{method}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|err| ChannelError::Transport(err.to_string()))?;
        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|err| ChannelError::Transport(err.to_string()))?;
        envelope.into_result()
    }

    /// Long-polls for new updates; `offset` acknowledges everything
    /// below it.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, ChannelError> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }
}

#[async_trait]
impl ChannelApi for TelegramApi {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        mode: DeliveryMode,
    ) -> Result<MessageId, ChannelError> {
        let mut payload = json!({ "chat_id": chat_id, "text": text });
        if mode == DeliveryMode::Html {
            payload["parse_mode"] = Value::from("HTML");
        }
        let sent: SentMessage = self.call("sendMessage", &payload).await?;
        Ok(MessageId(sent.message_id))
    }

    async fn edit_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> Result<(), ChannelError> {
        // The result is the edited message or `true`; neither is needed.
        let _: Value = self
            .call(
                "editMessageText",
                &json!({ "chat_id": chat_id, "message_id": message_id.0, "text": text }),
            )
            .await?;
        Ok(())
    }

    async fn delete_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), ChannelError> {
        let _: bool = self
            .call(
                "deleteMessage",
                &json!({ "chat_id": chat_id, "message_id": message_id.0 }),
            )
            .await?;
        Ok(())
    }

    async fn send_presence(&self, chat_id: ChatId, kind: PresenceKind) -> Result<(), ChannelError> {
        let _: bool = self
            .call(
                "sendChatAction",
                &json!({ "chat_id": chat_id, "action": kind.as_str() }),
            )
            .await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ApiEnvelope<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

impl<T> ApiEnvelope<T> {
    fn into_result(self) -> Result<T, ChannelError> {
        if self.ok {
            self.result
                .ok_or_else(|| ChannelError::Rejected("response carried no result".to_string()))
        } else {
            Err(ChannelError::Rejected(
                self.description
                    .unwrap_or_else(|| "unknown Telegram API error".to_string()),
            ))
        }
    }
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub text: Option<String>,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_text_update() {
        let updates: Vec<Update> = serde_json::from_str(
            r#"[{
                "update_id": 7,
                "message": {
                    "message_id": 12,
                    "text": "hello",
                    "chat": {"id": 42, "type": "private"},
                    "from": {"id": 42, "is_bot": false, "first_name": "A"}
                }
            }]"#,
        )
        .unwrap();
        assert_eq!(updates.len(), 1);
        let message = updates[0].message.as_ref().unwrap();
        assert_eq!(message.chat.id, 42);
        assert_eq!(message.from.as_ref().unwrap().id, 42);
        assert_eq!(message.text.as_deref(), Some("hello"));
    }

    #[test]
    fn tolerates_updates_without_messages() {
        let updates: Vec<Update> =
            serde_json::from_str(r#"[{"update_id": 8, "edited_message": {}}]"#).unwrap();
        assert!(updates[0].message.is_none());
    }

    #[test]
    fn ok_envelope_yields_the_result() {
        let envelope: ApiEnvelope<SentMessage> =
            serde_json::from_str(r#"{"ok": true, "result": {"message_id": 99}}"#).unwrap();
        assert_eq!(envelope.into_result().unwrap().message_id, 99);
    }

    #[test]
    fn error_envelope_carries_the_description() {
        let envelope: ApiEnvelope<SentMessage> = serde_json::from_str(
            r#"{"ok": false, "error_code": 400, "description": "Bad Request: can't parse entities"}"#,
        )
        .unwrap();
        let err = envelope.into_result().unwrap_err();
        assert!(err.to_string().contains("can't parse entities"));
    }
}
