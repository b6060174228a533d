//! Message: the atomic unit of a conversation.
//!
//! A message is either server-confirmed or provisional. Provisional
//! messages are created locally at optimistic-insert time, carry a
//! temporary id, and are replaced by their server counterpart during
//! reconciliation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::types::{ConversationId, MessageId};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    /// Stable wire name for the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(CoreError::UnknownRole(other.to_owned())),
        }
    }
}

/// Delivery state of a message.
///
/// `Pending` and `Failed` messages are provisional: they exist only
/// locally and have not been confirmed by the server. A `Failed`
/// message stays visible so the consumer can offer a resend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// Sent optimistically, awaiting server confirmation.
    Pending,
    /// Confirmed by the server.
    Confirmed,
    /// Send failed or timed out; eligible for resend.
    Failed,
}

/// A single chat message.
///
/// `created_at` is milliseconds since the Unix epoch: server time for
/// confirmed messages, local time for provisional ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: MessageRole,
    pub content: String,
    pub created_at: i64,
    #[serde(rename = "status", default = "default_state")]
    pub state: DeliveryState,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

fn default_state() -> DeliveryState {
    DeliveryState::Confirmed
}

impl Message {
    /// Build a server-confirmed message. Fails on empty content.
    pub fn confirmed(
        id: impl Into<MessageId>,
        conversation_id: impl Into<ConversationId>,
        role: MessageRole,
        content: impl Into<String>,
        created_at: i64,
    ) -> Result<Self, CoreError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(CoreError::EmptyContent);
        }
        Ok(Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            role,
            content,
            created_at,
            state: DeliveryState::Confirmed,
            metadata: serde_json::Value::Null,
        })
    }

    /// Build a provisional message with a fresh temporary id, stamped
    /// with the caller-supplied local time.
    pub fn provisional(
        conversation_id: impl Into<ConversationId>,
        role: MessageRole,
        content: impl Into<String>,
        now: i64,
    ) -> Result<Self, CoreError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(CoreError::EmptyContent);
        }
        Ok(Self {
            id: MessageId::temporary(),
            conversation_id: conversation_id.into(),
            role,
            content,
            created_at: now,
            state: DeliveryState::Pending,
            metadata: serde_json::Value::Null,
        })
    }

    /// Attach arbitrary metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Whether this message has not been confirmed by the server.
    pub fn is_provisional(&self) -> bool {
        matches!(self.state, DeliveryState::Pending | DeliveryState::Failed)
    }

    /// Whether this message is awaiting confirmation.
    pub fn is_pending(&self) -> bool {
        self.state == DeliveryState::Pending
    }

    /// Whether this message failed to send.
    pub fn is_failed(&self) -> bool {
        self.state == DeliveryState::Failed
    }
}
