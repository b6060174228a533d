//! # Parley
//!
//! A client-side synchronization engine for agent conversations.
//!
//! Conversations live on a server that appends its own messages (agent
//! replies) out of band; this crate keeps a local, ordered,
//! deduplicated view of each conversation fresh through periodic
//! refresh and optimistic sends.
//!
//! ```no_run
//! use parley::{ConversationId, MemoryBackend, SyncEngine};
//!
//! # async fn demo() {
//! let backend = MemoryBackend::new();
//! let engine = SyncEngine::with_defaults(std::sync::Arc::new(backend.transport()));
//!
//! let conv = ConversationId::new("support-42");
//! let mut sub = engine.observe(&conv);
//!
//! engine.send(&conv, "hello").await.ok();
//! while let Some(snapshot) = sub.next().await {
//!     for msg in &snapshot.state.messages {
//!         println!("{}: {}", msg.role, msg.content);
//!     }
//! }
//! # }
//! ```

pub mod engine;
pub mod error;

pub use engine::{EngineConfig, SendReceipt, Subscription, SyncEngine};
pub use error::{EngineError, Result};

pub use parley_core::{
    ConversationId, ConversationState, DeliveryState, ErrorKind, Message, MessageId,
    MessageRole, SyncStatus,
};
pub use parley_store::{ConversationSnapshot, MessageStore};
pub use parley_sync::{
    MemoryBackend, MemoryTransport, OutgoingMessage, SchedulerConfig, SyncError, Transport,
};
