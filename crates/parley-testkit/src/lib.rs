//! # Parley Testkit
//!
//! Shared test tooling: a [`TestFixture`] that pairs a [`parley::SyncEngine`]
//! with its scriptable in-memory backend, and proptest strategies for
//! generating conversation histories.

pub mod fixtures;
pub mod generators;

pub use fixtures::TestFixture;
pub use generators::{confirmed_batch, content, role, timestamp};
