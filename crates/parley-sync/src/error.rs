//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur during transport and scheduling operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network-level failure of a fetch or send.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server rejected the request.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
