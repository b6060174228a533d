//! Transport abstraction for the conversation engine.
//!
//! The transport performs the request/response message send and the
//! authoritative conversation fetch, and may additionally deliver
//! pushed messages. The engine tolerates any combination being
//! available: polling is the fallback of record, push is purely an
//! accelerant.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use parley_core::{ConversationId, Message, MessageRole};

use crate::error::Result;

/// A message submission as sent to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl OutgoingMessage {
    /// A plain user submission.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            metadata: serde_json::Value::Null,
        }
    }

    /// The outgoing form of a provisional message.
    pub fn from_message(msg: &Message) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
            metadata: msg.metadata.clone(),
        }
    }
}

/// Transport trait for conversation fetch, send, and optional push.
///
/// Implementations must be thread-safe (Send + Sync). The engine only
/// depends on observable behavior; wire details stay behind this
/// trait.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Fetch the authoritative message list of a conversation.
    async fn fetch_conversation(&self, conversation_id: &ConversationId)
        -> Result<Vec<Message>>;

    /// Send a message and return the server's confirmed copy.
    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        outgoing: &OutgoingMessage,
    ) -> Result<Message>;

    /// Subscribe to pushed messages for a conversation, if the
    /// transport supports push. Delivery is unordered and possibly
    /// duplicated; the engine merges it as an incremental append.
    fn subscribe_push(
        &self,
        _conversation_id: &ConversationId,
    ) -> Option<mpsc::Receiver<Message>> {
        None
    }

    /// Whether a push channel is currently connected. Polling backs
    /// off while this reports true but is never disabled.
    fn push_connected(&self) -> bool {
        false
    }
}

/// An in-memory transport backed by a scriptable fake server.
///
/// Used by tests and the testkit to exercise the engine without a
/// network.
pub mod memory {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use parley_core::now_millis;

    use crate::error::SyncError;

    #[derive(Default)]
    struct BackendInner {
        conversations: HashMap<ConversationId, Vec<Message>>,
        assistant_replies: HashMap<ConversationId, VecDeque<String>>,
        push_senders: HashMap<ConversationId, Vec<mpsc::Sender<Message>>>,
        fail_fetches: u32,
        fail_sends: u32,
        send_delay: Duration,
        fetch_delay: Duration,
        fetch_count: u64,
        push_connected: bool,
        next_id: u64,
    }

    /// A scriptable fake conversation server.
    ///
    /// Holds the authoritative message list per conversation and lets
    /// tests inject failures, delays, pushed messages, and queued
    /// agent replies.
    pub struct MemoryBackend {
        inner: Mutex<BackendInner>,
    }

    impl MemoryBackend {
        /// Create an empty backend.
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: Mutex::new(BackendInner::default()),
            })
        }

        /// Create a transport handle onto this backend.
        pub fn transport(self: &Arc<Self>) -> MemoryTransport {
            MemoryTransport {
                backend: Arc::clone(self),
            }
        }

        /// Seed a conversation's server-side message list.
        pub fn seed(&self, conversation_id: &ConversationId, messages: Vec<Message>) {
            let mut inner = self.inner.lock().unwrap();
            inner
                .conversations
                .insert(conversation_id.clone(), messages);
        }

        /// Queue an assistant reply that the server will store after
        /// the next send, appearing in subsequent fetches.
        pub fn enqueue_assistant_reply(
            &self,
            conversation_id: &ConversationId,
            content: impl Into<String>,
        ) {
            let mut inner = self.inner.lock().unwrap();
            inner
                .assistant_replies
                .entry(conversation_id.clone())
                .or_default()
                .push_back(content.into());
        }

        /// Make the next `n` fetches fail with a transport error.
        pub fn fail_next_fetches(&self, n: u32) {
            self.inner.lock().unwrap().fail_fetches = n;
        }

        /// Make the next `n` sends fail with a transport error.
        pub fn fail_next_sends(&self, n: u32) {
            self.inner.lock().unwrap().fail_sends = n;
        }

        /// Delay send responses by `delay`.
        pub fn set_send_delay(&self, delay: Duration) {
            self.inner.lock().unwrap().send_delay = delay;
        }

        /// Delay fetch responses by `delay`.
        pub fn set_fetch_delay(&self, delay: Duration) {
            self.inner.lock().unwrap().fetch_delay = delay;
        }

        /// Toggle the reported push connectivity.
        pub fn set_push_connected(&self, connected: bool) {
            self.inner.lock().unwrap().push_connected = connected;
        }

        /// Store a message server-side and deliver it on the push
        /// channel.
        pub fn inject_push(&self, conversation_id: &ConversationId, message: Message) {
            let senders = {
                let mut inner = self.inner.lock().unwrap();
                inner
                    .conversations
                    .entry(conversation_id.clone())
                    .or_default()
                    .push(message.clone());
                inner
                    .push_senders
                    .get(conversation_id)
                    .cloned()
                    .unwrap_or_default()
            };
            for tx in senders {
                // A full or closed subscriber just misses the push;
                // the next poll delivers the message anyway.
                let _ = tx.try_send(message.clone());
            }
        }

        /// How many fetches the backend has served or failed.
        pub fn fetch_count(&self) -> u64 {
            self.inner.lock().unwrap().fetch_count
        }

        /// The server-side message list.
        pub fn messages(&self, conversation_id: &ConversationId) -> Vec<Message> {
            self.inner
                .lock()
                .unwrap()
                .conversations
                .get(conversation_id)
                .cloned()
                .unwrap_or_default()
        }

        fn next_message_id(inner: &mut BackendInner) -> String {
            inner.next_id += 1;
            format!("srv-{}", inner.next_id)
        }
    }

    /// Transport handle over a [`MemoryBackend`].
    pub struct MemoryTransport {
        backend: Arc<MemoryBackend>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn fetch_conversation(
            &self,
            conversation_id: &ConversationId,
        ) -> Result<Vec<Message>> {
            let delay = self.backend.inner.lock().unwrap().fetch_delay;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let mut inner = self.backend.inner.lock().unwrap();
            inner.fetch_count += 1;
            if inner.fail_fetches > 0 {
                inner.fail_fetches -= 1;
                return Err(SyncError::Transport("connection refused".into()));
            }
            Ok(inner
                .conversations
                .get(conversation_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn send_message(
            &self,
            conversation_id: &ConversationId,
            outgoing: &OutgoingMessage,
        ) -> Result<Message> {
            let delay = self.backend.inner.lock().unwrap().send_delay;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let mut inner = self.backend.inner.lock().unwrap();
            if inner.fail_sends > 0 {
                inner.fail_sends -= 1;
                return Err(SyncError::Transport("connection reset".into()));
            }

            let now = now_millis();
            let id = MemoryBackend::next_message_id(&mut inner);
            let confirmed = Message::confirmed(
                id,
                conversation_id.clone(),
                outgoing.role,
                outgoing.content.clone(),
                now,
            )
            .map_err(|e| SyncError::Rejected(e.to_string()))?
            .with_metadata(outgoing.metadata.clone());

            let entry = inner
                .conversations
                .entry(conversation_id.clone())
                .or_default();
            entry.push(confirmed.clone());

            if let Some(reply) = inner
                .assistant_replies
                .get_mut(conversation_id)
                .and_then(|q| q.pop_front())
            {
                let reply_id = MemoryBackend::next_message_id(&mut inner);
                let reply_msg = Message::confirmed(
                    reply_id,
                    conversation_id.clone(),
                    MessageRole::Assistant,
                    reply,
                    now + 1,
                )
                .map_err(|e| SyncError::Rejected(e.to_string()))?;
                inner
                    .conversations
                    .entry(conversation_id.clone())
                    .or_default()
                    .push(reply_msg);
            }

            Ok(confirmed)
        }

        fn subscribe_push(
            &self,
            conversation_id: &ConversationId,
        ) -> Option<mpsc::Receiver<Message>> {
            let (tx, rx) = mpsc::channel(64);
            self.backend
                .inner
                .lock()
                .unwrap()
                .push_senders
                .entry(conversation_id.clone())
                .or_default()
                .push(tx);
            Some(rx)
        }

        fn push_connected(&self) -> bool {
            self.backend.inner.lock().unwrap().push_connected
        }
    }
}
