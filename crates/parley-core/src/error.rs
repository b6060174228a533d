//! Error types for the Parley core.

use thiserror::Error;

/// Core errors that can occur while constructing messages.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("message content cannot be empty")]
    EmptyContent,

    #[error("unknown message role: {0}")]
    UnknownRole(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
