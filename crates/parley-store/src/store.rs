//! The Message Store: exclusive owner of per-conversation state.
//!
//! All message mutation funnels through [`MessageStore::merge`], which
//! applies the core merge algorithm atomically and emits exactly one
//! snapshot per call on the conversation's watch channel, no-op diffs
//! included. Entries are reference-counted by subscriber and evicted
//! when the last subscriber releases; nothing survives eviction, the
//! server remains the durable source of truth.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use parley_core::{
    merge, now_millis, ConversationId, ConversationState, MergeOp, MergeOutcome, SyncStatus,
};

/// Default grace window for unechoed provisional messages (ms).
pub const DEFAULT_GRACE_WINDOW_MS: i64 = 5_000;

/// One emitted view of a conversation: the message state plus the
/// connection status, shared immutably between all subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSnapshot {
    pub state: ConversationState,
    pub status: SyncStatus,
}

struct Entry {
    state: ConversationState,
    status: SyncStatus,
    tx: watch::Sender<Arc<ConversationSnapshot>>,
    subscribers: usize,
}

impl Entry {
    fn new(conversation_id: ConversationId) -> Self {
        let state = ConversationState::new(conversation_id);
        let status = SyncStatus::default();
        let (tx, _rx) = watch::channel(Arc::new(ConversationSnapshot {
            state: state.clone(),
            status,
        }));
        Self {
            state,
            status,
            tx,
            subscribers: 0,
        }
    }

    fn emit(&self) {
        self.tx.send_replace(Arc::new(ConversationSnapshot {
            state: self.state.clone(),
            status: self.status,
        }));
    }
}

/// In-memory store of conversation states, keyed by conversation id.
///
/// Thread-safe; every mutation runs as one atomic step under the lock
/// so no partial update is ever observable.
pub struct MessageStore {
    grace_window_ms: i64,
    inner: Mutex<HashMap<ConversationId, Entry>>,
}

impl MessageStore {
    /// Create a store with an explicit grace window.
    pub fn new(grace_window_ms: i64) -> Self {
        Self {
            grace_window_ms,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Apply a merge operation using the local wall clock.
    pub fn merge(&self, conversation_id: &ConversationId, op: MergeOp) -> MergeOutcome {
        self.merge_at(conversation_id, op, now_millis())
    }

    /// Apply a merge operation with a caller-supplied clock.
    ///
    /// The conversation entry is created on first access. Exactly one
    /// snapshot is emitted per call.
    pub fn merge_at(
        &self,
        conversation_id: &ConversationId,
        op: MergeOp,
        now: i64,
    ) -> MergeOutcome {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .entry(conversation_id.clone())
            .or_insert_with(|| Entry::new(conversation_id.clone()));

        let outcome = merge(&mut entry.state, op, now, self.grace_window_ms);
        if !outcome.conflicts.is_empty() {
            tracing::warn!(
                conversation = %conversation_id,
                conflicts = ?outcome.conflicts,
                "server copy overrode local message content"
            );
        }
        entry.emit();
        outcome
    }

    /// Apply a merge operation only if the conversation is resident.
    ///
    /// Unlike [`MessageStore::merge`], this never creates an entry:
    /// a result that arrives after the conversation was evicted is
    /// discarded, so an evicted conversation cannot be resurrected
    /// with no subscriber left to release it. Returns `None` when the
    /// result was discarded.
    pub fn merge_if_resident(
        &self,
        conversation_id: &ConversationId,
        op: MergeOp,
    ) -> Option<MergeOutcome> {
        self.merge_at_if_resident(conversation_id, op, now_millis())
    }

    /// [`MessageStore::merge_if_resident`] with a caller-supplied clock.
    pub fn merge_at_if_resident(
        &self,
        conversation_id: &ConversationId,
        op: MergeOp,
        now: i64,
    ) -> Option<MergeOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.get_mut(conversation_id) else {
            tracing::debug!(
                conversation = %conversation_id,
                "discarding result for evicted conversation"
            );
            return None;
        };

        let outcome = merge(&mut entry.state, op, now, self.grace_window_ms);
        if !outcome.conflicts.is_empty() {
            tracing::warn!(
                conversation = %conversation_id,
                conflicts = ?outcome.conflicts,
                "server copy overrode local message content"
            );
        }
        entry.emit();
        Some(outcome)
    }

    /// Mutate the conversation's sync status and emit a snapshot.
    ///
    /// A no-op for conversations that are not resident; status belongs
    /// to an observed conversation, so eviction discards it too.
    pub fn update_status(
        &self,
        conversation_id: &ConversationId,
        f: impl FnOnce(&mut SyncStatus),
    ) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.get_mut(conversation_id) {
            f(&mut entry.status);
            entry.emit();
        }
    }

    /// Subscribe to a conversation's snapshot stream.
    ///
    /// The receiver immediately holds the current snapshot (hot
    /// semantics, no buffered history). Returns the receiver and the
    /// new subscriber count.
    pub fn subscribe(
        &self,
        conversation_id: &ConversationId,
    ) -> (watch::Receiver<Arc<ConversationSnapshot>>, usize) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .entry(conversation_id.clone())
            .or_insert_with(|| Entry::new(conversation_id.clone()));
        entry.subscribers += 1;
        (entry.tx.subscribe(), entry.subscribers)
    }

    /// Release one subscription. Returns the remaining count; at zero
    /// the conversation entry is evicted.
    pub fn release(&self, conversation_id: &ConversationId) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.get_mut(conversation_id) else {
            return 0;
        };
        entry.subscribers = entry.subscribers.saturating_sub(1);
        let remaining = entry.subscribers;
        if remaining == 0 {
            inner.remove(conversation_id);
        }
        remaining
    }

    /// Current subscriber count for a conversation.
    pub fn subscriber_count(&self, conversation_id: &ConversationId) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .get(conversation_id)
            .map(|e| e.subscribers)
            .unwrap_or(0)
    }

    /// Whether the store currently holds state for a conversation.
    pub fn contains(&self, conversation_id: &ConversationId) -> bool {
        self.inner.lock().unwrap().contains_key(conversation_id)
    }

    /// The current snapshot, if the conversation exists.
    pub fn snapshot(&self, conversation_id: &ConversationId) -> Option<Arc<ConversationSnapshot>> {
        let inner = self.inner.lock().unwrap();
        inner
            .get(conversation_id)
            .map(|e| e.tx.borrow().clone())
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_WINDOW_MS)
    }
}
