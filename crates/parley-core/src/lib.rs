//! # Parley Core
//!
//! Pure data model and reconciliation algorithm for the Parley
//! conversation engine.
//!
//! This crate contains no I/O, no timers, no networking. It is pure
//! computation over conversation state, so the merge rules can be
//! tested without transports or clocks.
//!
//! ## Key Types
//!
//! - [`Message`] - A chat message, confirmed or provisional
//! - [`ConversationState`] - The ordered, deduplicated sequence for one conversation
//! - [`MergeOp`] / [`merge`] - The single mutation algorithm
//! - [`SyncStatus`] - Connection status surfaced to consumers

pub mod conversation;
pub mod error;
pub mod merge;
pub mod message;
pub mod status;
pub mod types;

pub use conversation::{ConversationState, FailedSend};
pub use error::CoreError;
pub use merge::{merge, MergeOp, MergeOutcome};
pub use message::{DeliveryState, Message, MessageRole};
pub use status::{ErrorKind, SyncStatus};
pub use types::{now_millis, ConversationId, MessageId};
