//! The reconciliation merge algorithm.
//!
//! All mutation of a [`ConversationState`] goes through [`merge`], a
//! pure function over the state, an operation, and the caller's clock.
//! Keeping it free of timers and transports makes the ordering,
//! identifier-reconciliation, and deduplication rules testable in
//! isolation.
//!
//! Ordering rules:
//! - `messages` stays sorted ascending by `created_at`; equal
//!   timestamps keep their relative insertion order.
//! - A displayed message never moves backward: new arrivals insert
//!   after all entries with an equal-or-earlier timestamp.
//!
//! Deduplication rules:
//! - Confirmed messages deduplicate strictly by id; the server copy is
//!   authoritative on content.
//! - Pending provisionals deduplicate by `(role, content)` within the
//!   grace window, both against repeated optimistic inserts and
//!   against their own server echo arriving through a fetch.

use crate::conversation::{ConversationState, FailedSend};
use crate::message::{DeliveryState, Message};
use crate::types::MessageId;

/// A mutation request against one conversation.
#[derive(Debug, Clone)]
pub enum MergeOp {
    /// The authoritative message list returned by a fetch.
    FullReplace { messages: Vec<Message> },
    /// Messages delivered by the push channel: unordered, possibly
    /// duplicated, never authoritative over a fetch.
    IncrementalAppend { messages: Vec<Message> },
    /// A locally created provisional message, inserted before any
    /// network call resolves.
    OptimisticInsert { message: Message },
    /// The server's confirmation for a provisional send.
    ReconcileProvisional {
        provisional_id: MessageId,
        confirmed: Message,
    },
    /// A send error: flip the provisional entry to `Failed` in place.
    MarkFailed { provisional_id: MessageId },
}

/// What a merge call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Whether the visible state changed.
    pub changed: bool,
    /// Messages newly added to the sequence.
    pub inserted: usize,
    /// Incoming messages that were already known and identical.
    pub duplicates: usize,
    /// Provisional entries replaced by their server counterpart.
    pub reconciled: usize,
    /// Ids where the server disagreed with local content (server won).
    pub conflicts: Vec<MessageId>,
    /// Provisional sends dropped by the grace-window sweep.
    pub timed_out: Vec<MessageId>,
}

/// Apply one operation to a conversation state.
///
/// `now` is the caller's clock in Unix ms; `grace_window_ms` bounds
/// how long an unechoed pending send stays visible across a
/// `FullReplace`.
pub fn merge(
    state: &mut ConversationState,
    op: MergeOp,
    now: i64,
    grace_window_ms: i64,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    match op {
        MergeOp::FullReplace { messages } => {
            for incoming in messages {
                upsert_confirmed(state, incoming, &mut outcome, true);
            }
            sweep_expired(state, now, grace_window_ms, &mut outcome);
            state.last_synced_at = Some(now);
        }
        MergeOp::IncrementalAppend { messages } => {
            for incoming in messages {
                upsert_confirmed(state, incoming, &mut outcome, true);
            }
        }
        MergeOp::OptimisticInsert { message } => {
            let duplicate = state.messages.iter().any(|m| {
                m.is_pending()
                    && m.role == message.role
                    && m.content == message.content
                    && now - m.created_at <= grace_window_ms
            });
            if duplicate {
                outcome.duplicates += 1;
            } else {
                insert_sorted(&mut state.messages, message);
                outcome.inserted += 1;
                outcome.changed = true;
            }
        }
        MergeOp::ReconcileProvisional {
            provisional_id,
            confirmed,
        } => {
            if let Some(pos) = position_of(state, &provisional_id) {
                state.messages.remove(pos);
                outcome.reconciled += 1;
                outcome.changed = true;
            }
            // Echo matching is disabled here: the provisional-to-real
            // mapping is already known, so a different pending entry
            // with identical content must not be consumed.
            upsert_confirmed(state, confirmed, &mut outcome, false);
        }
        MergeOp::MarkFailed { provisional_id } => {
            if let Some(pos) = position_of(state, &provisional_id) {
                let msg = &mut state.messages[pos];
                if msg.is_pending() {
                    msg.state = DeliveryState::Failed;
                    outcome.changed = true;
                }
            }
        }
    }

    outcome
}

/// Upsert one server-confirmed message.
///
/// Resolution order: by id (server wins on content, position is kept);
/// then, when `match_echo` is set, by `(role, content)` against a
/// provisional entry, which reconciles a server echo that arrived via
/// fetch before the send response; otherwise a sorted insert.
fn upsert_confirmed(
    state: &mut ConversationState,
    mut incoming: Message,
    outcome: &mut MergeOutcome,
    match_echo: bool,
) {
    incoming.state = DeliveryState::Confirmed;

    if let Some(pos) = position_of(state, &incoming.id) {
        let existing = &mut state.messages[pos];
        if existing.content == incoming.content
            && existing.role == incoming.role
            && existing.metadata == incoming.metadata
            && existing.state == DeliveryState::Confirmed
        {
            outcome.duplicates += 1;
            return;
        }
        if existing.state == DeliveryState::Confirmed && existing.content != incoming.content {
            outcome.conflicts.push(incoming.id.clone());
        }
        // The entry keeps its display position: created_at is local
        // history, content is the server's.
        existing.role = incoming.role;
        existing.content = incoming.content;
        existing.metadata = incoming.metadata;
        existing.state = DeliveryState::Confirmed;
        outcome.changed = true;
        return;
    }

    if match_echo {
        let echo = state.messages.iter().position(|m| {
            m.is_provisional() && m.role == incoming.role && m.content == incoming.content
        });
        if let Some(pos) = echo {
            state.messages.remove(pos);
            insert_sorted(&mut state.messages, incoming);
            outcome.reconciled += 1;
            outcome.changed = true;
            return;
        }
    }

    insert_sorted(&mut state.messages, incoming);
    outcome.inserted += 1;
    outcome.changed = true;
}

/// Drop pending provisionals older than the grace window, recording
/// each as a failed send exactly once.
fn sweep_expired(
    state: &mut ConversationState,
    now: i64,
    grace_window_ms: i64,
    outcome: &mut MergeOutcome,
) {
    let mut expired = Vec::new();
    state.messages.retain(|m| {
        if m.is_pending() && now - m.created_at > grace_window_ms {
            expired.push(m.clone());
            false
        } else {
            true
        }
    });

    for msg in expired {
        if !state.has_failed_send(&msg.id) {
            state.failed_sends.push(FailedSend {
                message_id: msg.id.clone(),
                role: msg.role,
                content: msg.content,
                failed_at: now,
            });
        }
        outcome.timed_out.push(msg.id);
        outcome.changed = true;
    }
}

fn position_of(state: &ConversationState, id: &MessageId) -> Option<usize> {
    state.messages.iter().position(|m| &m.id == id)
}

/// Insert keeping ascending `created_at` order; ties go after existing
/// entries so insertion order is preserved and positions never
/// regress.
fn insert_sorted(messages: &mut Vec<Message>, msg: Message) {
    let idx = messages.partition_point(|m| m.created_at <= msg.created_at);
    messages.insert(idx, msg);
}
