//! Delivery-channel boundary.
//!
//! The bridge consumes exactly four channel capabilities; everything
//! else the front end can do (commands, auth, polling) lives outside
//! this crate. Implemented by the Telegram client in production and by
//! recording mocks in tests.

use async_trait::async_trait;
use thiserror::Error;

pub type ChatId = i64;

/// Opaque handle for a delivered message, used for later edit/delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Channel-flavored HTML subset.
    Html,
    /// No markup interpretation.
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceKind {
    Typing,
}

impl PresenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Typing => "typing",
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel transport error: {0}")]
    Transport(String),

    #[error("channel rejected request: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait ChannelApi: Send + Sync {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        mode: DeliveryMode,
    ) -> Result<MessageId, ChannelError>;

    async fn edit_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> Result<(), ChannelError>;

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId)
    -> Result<(), ChannelError>;

    async fn send_presence(&self, chat_id: ChatId, kind: PresenceKind) -> Result<(), ChannelError>;
}

/// Discards a best-effort channel result, keeping the discard visible.
///
/// Status edits/deletes, presence pulses and crash notices must never
/// fail or block the primary response path; their error channel is
/// logged and dropped by contract.
pub fn best_effort<T>(what: &'static str, result: Result<T, ChannelError>) {
    if let Err(err) = result {
        tracing::debug!(error = %err, what, "best-effort channel call failed");
    }
}
