//! # Parley Store
//!
//! Ownership of per-conversation message state for the Parley engine.
//!
//! The [`MessageStore`] is the only component allowed to mutate a
//! [`parley_core::ConversationState`], and it does so exclusively
//! through the core merge algorithm. Consumers observe state through
//! hot, replay-on-subscribe watch channels.
//!
//! ## Key Types
//!
//! - [`MessageStore`] - Keyed conversation states with the single `merge` entry point
//! - [`ConversationSnapshot`] - One emitted `{ state, status }` view
//!
//! ## Design Notes
//!
//! - **One snapshot per merge**: every merge call emits, no-op diffs
//!   included, so consumers never have to reason about suppressed
//!   updates.
//! - **Reference counting**: entries live exactly as long as at least
//!   one subscriber does; eviction drops everything (in-memory only).

pub mod store;

pub use store::{ConversationSnapshot, MessageStore, DEFAULT_GRACE_WINDOW_MS};
