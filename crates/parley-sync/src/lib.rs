//! Transport abstraction and sync scheduling.
//!
//! This crate connects a [`parley_store::MessageStore`] to a remote
//! conversation service. The [`Transport`] trait is the seam: the
//! scheduler and the engine facade are generic over it, and
//! [`memory::MemoryBackend`] provides a scriptable in-process
//! implementation for tests.

pub mod error;
pub mod scheduler;
pub mod transport;

pub use error::{Result, SyncError};
pub use scheduler::{SchedulerCommand, SchedulerConfig, SyncScheduler};
pub use transport::memory::{MemoryBackend, MemoryTransport};
pub use transport::{OutgoingMessage, Transport};
