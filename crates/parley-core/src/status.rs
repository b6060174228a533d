//! Connection and synchronization status surfaced to consumers.

use serde::{Deserialize, Serialize};

/// The error taxonomy surfaced through [`SyncStatus::last_error`].
///
/// None of these is fatal: the worst user-visible outcome is a stale
/// or pending indicator. Previously displayed messages are never
/// cleared by an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A fetch or send failed at the network level; retried on the
    /// next scheduled tick.
    TransportUnavailable,
    /// A provisional message aged past the grace window without a
    /// server echo.
    SendTimeout,
    /// Repeated fetch failures; last-known messages remain visible.
    SyncDegraded,
    /// A fetch result disagreed with local content for the same id;
    /// the server copy won.
    ReconciliationConflict,
}

/// Connection/sync status of one observed conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub transport_available: bool,
    pub last_error: Option<ErrorKind>,
}

impl SyncStatus {
    /// Record an error without touching availability.
    pub fn record_error(&mut self, kind: ErrorKind) {
        self.last_error = Some(kind);
    }

    /// Mark the transport healthy again and clear the last error.
    pub fn mark_recovered(&mut self) {
        self.transport_available = true;
        self.last_error = None;
    }

    /// Mark the transport degraded.
    pub fn mark_degraded(&mut self) {
        self.transport_available = false;
        self.last_error = Some(ErrorKind::SyncDegraded);
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            transport_available: true,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_available() {
        let status = SyncStatus::default();
        assert!(status.transport_available);
        assert!(status.last_error.is_none());
    }

    #[test]
    fn test_degrade_and_recover() {
        let mut status = SyncStatus::default();
        status.mark_degraded();
        assert!(!status.transport_available);
        assert_eq!(status.last_error, Some(ErrorKind::SyncDegraded));

        status.mark_recovered();
        assert!(status.transport_available);
        assert!(status.last_error.is_none());
    }
}
