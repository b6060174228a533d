//! Per-conversation message state.
//!
//! A [`ConversationState`] holds the ordered, deduplicated message
//! sequence for one conversation. It is mutated exclusively through
//! the merge algorithm in [`crate::merge`]; everything else reads.

use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageRole};
use crate::types::{ConversationId, MessageId};

/// Record of a provisional send that aged out without a server echo.
///
/// The original content is retained so a consumer can offer a resend;
/// the message itself is no longer part of the visible sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedSend {
    pub message_id: MessageId,
    pub role: MessageRole,
    pub content: String,
    pub failed_at: i64,
}

/// The current state of one conversation.
///
/// Invariants (maintained by the merge algorithm):
/// - `messages` is sorted ascending by `created_at`; equal timestamps
///   keep their relative insertion order.
/// - No two entries share a non-temporary id.
/// - A provisional message and its server counterpart are never both
///   present after reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: ConversationId,
    pub messages: Vec<Message>,
    /// When the last authoritative fetch was merged (Unix ms).
    pub last_synced_at: Option<i64>,
    /// Sends dropped by the grace-window sweep, oldest first.
    pub failed_sends: Vec<FailedSend>,
}

impl ConversationState {
    /// Create an empty state for a conversation.
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            messages: Vec::new(),
            last_synced_at: None,
            failed_sends: Vec::new(),
        }
    }

    /// Number of optimistic sends still awaiting confirmation.
    pub fn pending_send_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_pending()).count()
    }

    /// Look up a message by id.
    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Whether a send has already been recorded as timed out.
    pub fn has_failed_send(&self, id: &MessageId) -> bool {
        self.failed_sends.iter().any(|f| &f.message_id == id)
    }
}
