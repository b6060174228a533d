//! Engine-level errors.

use parley_core::{CoreError, MessageId};
use parley_sync::SyncError;

/// Errors surfaced by [`crate::SyncEngine`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The message was rejected before anything left the client.
    #[error(transparent)]
    Invalid(#[from] CoreError),

    /// The transport rejected or failed the send. The provisional
    /// message remains in the conversation, marked failed.
    #[error("send of {provisional_id} failed: {source}")]
    SendFailed {
        provisional_id: MessageId,
        #[source]
        source: SyncError,
    },

    /// The transport did not answer within the send timeout. The
    /// provisional message stays pending: the server may still have
    /// accepted it, in which case a later refresh confirms it.
    #[error("send of {provisional_id} timed out after {timeout_ms}ms")]
    SendTimedOut {
        provisional_id: MessageId,
        timeout_ms: i64,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;
