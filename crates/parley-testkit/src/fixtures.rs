//! Ready-made engine + backend pairs for integration tests.

use std::sync::Arc;
use std::time::Duration;

use parley::{EngineConfig, MemoryTransport, SyncEngine};
use parley_core::ConversationId;
use parley_sync::{MemoryBackend, SchedulerConfig};

/// An engine wired to a scriptable in-memory backend.
///
/// The backend handle is kept alongside the engine so tests can seed
/// server state, script failures, and inspect what the "server" saw.
pub struct TestFixture {
    pub backend: Arc<MemoryBackend>,
    pub engine: SyncEngine<MemoryTransport>,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let backend = MemoryBackend::new();
        let engine = SyncEngine::new(Arc::new(backend.transport()), config);
        Self { backend, engine }
    }

    /// A fixture with short timings, for tests that want several poll
    /// cycles without sleeping through full production intervals.
    pub fn fast() -> Self {
        Self::with_config(EngineConfig {
            scheduler: SchedulerConfig {
                poll_interval: Duration::from_millis(50),
                push_poll_interval: Duration::from_millis(500),
                suspension_timeout: Duration::from_millis(200),
                failure_threshold: 3,
            },
            grace_window_ms: 100,
            send_timeout: Duration::from_millis(200),
        })
    }

    pub fn conversation(&self, id: &str) -> ConversationId {
        ConversationId::new(id)
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
