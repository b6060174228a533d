//! The sync scheduler: periodic refresh of one conversation.
//!
//! One scheduler task runs per observed conversation. It fetches the
//! authoritative message list on a timer, suspends while a send is in
//! flight, performs one out-of-band fetch when a send completes, and
//! degrades the conversation's sync status after repeated failures
//! without ever discarding known messages.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use parley_core::{ConversationId, ErrorKind, MergeOp};
use parley_store::MessageStore;

use crate::transport::Transport;

/// Configuration for sync scheduling.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Base polling interval while no push channel is connected.
    pub poll_interval: Duration,
    /// Relaxed polling interval while push reports connected; polling
    /// is never disabled entirely.
    pub push_poll_interval: Duration,
    /// Maximum time polling stays suspended for an in-flight send.
    pub suspension_timeout: Duration,
    /// Consecutive fetch failures before the status degrades.
    pub failure_threshold: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2_500),
            push_poll_interval: Duration::from_secs(10),
            suspension_timeout: Duration::from_secs(10),
            failure_threshold: 3,
        }
    }
}

/// Scheduler state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedulerState {
    /// Waiting for the next tick.
    Idle,
    /// A fetch is running.
    Polling,
    /// A send is in flight; ticks are skipped.
    Suspended,
}

/// Control commands sent by the engine's send path.
#[derive(Debug, Clone, Copy)]
pub enum SchedulerCommand {
    /// A send was initiated: skip ticks until resumed.
    Suspend,
    /// The send settled; optionally fetch immediately.
    Resume { fetch_now: bool },
}

/// Periodic refresh driver for one conversation.
pub struct SyncScheduler<T: Transport> {
    conversation_id: ConversationId,
    store: Arc<MessageStore>,
    transport: Arc<T>,
    config: SchedulerConfig,
    state: SchedulerState,
    consecutive_failures: u32,
    degraded: bool,
}

impl<T: Transport> SyncScheduler<T> {
    pub fn new(
        conversation_id: ConversationId,
        store: Arc<MessageStore>,
        transport: Arc<T>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            conversation_id,
            store,
            transport,
            config,
            state: SchedulerState::Idle,
            consecutive_failures: 0,
            degraded: false,
        }
    }

    /// Drive the refresh loop until the command channel closes.
    ///
    /// The first fetch runs immediately so a fresh subscriber sees the
    /// conversation without waiting a full interval. Push messages are
    /// merged as incremental appends as they arrive.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SchedulerCommand>) {
        let mut push_rx = self.transport.subscribe_push(&self.conversation_id);
        let mut next_tick = Instant::now();
        let mut suspend_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = sleep_until(next_tick) => {
                    if self.state != SchedulerState::Suspended {
                        self.fetch_once().await;
                    }
                    next_tick = Instant::now() + self.current_interval();
                }
                _ = async {
                    match suspend_deadline {
                        Some(deadline) => sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                }, if suspend_deadline.is_some() => {
                    // A lost send response must not stall polling
                    // forever.
                    tracing::debug!(
                        conversation = %self.conversation_id,
                        "suspension timeout elapsed, resuming polls"
                    );
                    self.state = SchedulerState::Idle;
                    suspend_deadline = None;
                }
                cmd = commands.recv() => match cmd {
                    Some(SchedulerCommand::Suspend) => {
                        self.state = SchedulerState::Suspended;
                        suspend_deadline =
                            Some(Instant::now() + self.config.suspension_timeout);
                    }
                    Some(SchedulerCommand::Resume { fetch_now }) => {
                        self.state = SchedulerState::Idle;
                        suspend_deadline = None;
                        if fetch_now {
                            self.fetch_once().await;
                            next_tick = Instant::now() + self.current_interval();
                        }
                    }
                    // Engine dropped the handle: tear down.
                    None => break,
                },
                pushed = async {
                    match push_rx.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => match pushed {
                    Some(message) => {
                        self.store.merge_if_resident(
                            &self.conversation_id,
                            MergeOp::IncrementalAppend { messages: vec![message] },
                        );
                    }
                    None => push_rx = None,
                },
            }
        }
    }

    fn current_interval(&self) -> Duration {
        if self.transport.push_connected() {
            self.config.push_poll_interval
        } else {
            self.config.poll_interval
        }
    }

    /// Run one fetch and merge it as the authoritative state.
    async fn fetch_once(&mut self) {
        self.state = SchedulerState::Polling;
        match self
            .transport
            .fetch_conversation(&self.conversation_id)
            .await
        {
            Ok(messages) => {
                self.consecutive_failures = 0;
                // A fetch that outlives the last subscriber is allowed
                // to finish, but its result is discarded: merging it
                // would re-create the evicted conversation.
                let Some(outcome) = self
                    .store
                    .merge_if_resident(&self.conversation_id, MergeOp::FullReplace { messages })
                else {
                    self.state = SchedulerState::Idle;
                    return;
                };

                if self.degraded {
                    self.degraded = false;
                    self.store
                        .update_status(&self.conversation_id, |s| s.mark_recovered());
                }
                if !outcome.timed_out.is_empty() {
                    tracing::warn!(
                        conversation = %self.conversation_id,
                        timed_out = ?outcome.timed_out,
                        "provisional sends aged out without server echo"
                    );
                    self.store.update_status(&self.conversation_id, |s| {
                        s.record_error(ErrorKind::SendTimeout)
                    });
                }
            }
            Err(err) => {
                // Retried on the next scheduled tick; no separate
                // retry loop.
                self.consecutive_failures += 1;
                tracing::warn!(
                    conversation = %self.conversation_id,
                    failures = self.consecutive_failures,
                    error = %err,
                    "conversation fetch failed"
                );
                if !self.degraded && self.consecutive_failures >= self.config.failure_threshold {
                    self.degraded = true;
                    self.store
                        .update_status(&self.conversation_id, |s| s.mark_degraded());
                }
            }
        }
        self.state = SchedulerState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryBackend;
    use parley_core::{Message, MessageRole};

    fn conv_id() -> ConversationId {
        ConversationId::new("c1")
    }

    fn confirmed(id: &str, content: &str, at: i64) -> Message {
        Message::confirmed(id, "c1", MessageRole::Assistant, content, at).unwrap()
    }

    // Subscribes before spawning, as the engine does: the scheduler
    // only merges into a resident conversation.
    fn spawn_scheduler(
        backend: &Arc<MemoryBackend>,
        store: &Arc<MessageStore>,
        config: SchedulerConfig,
    ) -> (
        mpsc::Sender<SchedulerCommand>,
        tokio::sync::watch::Receiver<Arc<parley_store::ConversationSnapshot>>,
    ) {
        let (sub, _) = store.subscribe(&conv_id());
        let (tx, rx) = mpsc::channel(16);
        let scheduler = SyncScheduler::new(
            conv_id(),
            Arc::clone(store),
            Arc::new(backend.transport()),
            config,
        );
        tokio::spawn(scheduler.run(rx));
        (tx, sub)
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_merges_authoritative_state() {
        let backend = MemoryBackend::new();
        backend.seed(&conv_id(), vec![confirmed("m1", "a", 10)]);
        let store = Arc::new(MessageStore::default());

        let (_tx, _sub) = spawn_scheduler(&backend, &store, SchedulerConfig::default());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let snap = store.snapshot(&conv_id()).unwrap();
        assert_eq!(snap.state.messages.len(), 1);
        assert!(snap.state.last_synced_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_ticks_at_interval() {
        let backend = MemoryBackend::new();
        let store = Arc::new(MessageStore::default());

        let (_tx, _sub) = spawn_scheduler(&backend, &store, SchedulerConfig::default());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.fetch_count(), 1);

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(backend.fetch_count(), 2);

        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(backend.fetch_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_skips_ticks_and_resume_fetches() {
        let backend = MemoryBackend::new();
        let store = Arc::new(MessageStore::default());

        let (tx, _sub) = spawn_scheduler(&backend, &store, SchedulerConfig::default());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.fetch_count(), 1);

        tx.send(SchedulerCommand::Suspend).await.unwrap();
        tokio::time::sleep(Duration::from_millis(6_000)).await;
        assert_eq!(backend.fetch_count(), 1);

        tx.send(SchedulerCommand::Resume { fetch_now: true })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspension_expires_after_timeout() {
        let backend = MemoryBackend::new();
        let store = Arc::new(MessageStore::default());

        let (tx, _sub) = spawn_scheduler(&backend, &store, SchedulerConfig::default());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.fetch_count(), 1);

        // Suspend and never resume: polling must come back on its own
        // after the suspension timeout (10s) plus one interval.
        tx.send(SchedulerCommand::Suspend).await.unwrap();
        tokio::time::sleep(Duration::from_secs(14)).await;
        assert!(backend.fetch_count() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_degrade_then_success_recovers() {
        let backend = MemoryBackend::new();
        backend.fail_next_fetches(3);
        let store = Arc::new(MessageStore::default());
        store.merge_at(
            &conv_id(),
            MergeOp::FullReplace { messages: vec![confirmed("m1", "a", 10)] },
            100,
        );

        let (_tx, _sub) = spawn_scheduler(&backend, &store, SchedulerConfig::default());
        tokio::time::sleep(Duration::from_millis(5_200)).await;

        let snap = store.snapshot(&conv_id()).unwrap();
        assert!(!snap.status.transport_available);
        // Known messages survive the degradation.
        assert_eq!(snap.state.messages.len(), 1);

        tokio::time::sleep(Duration::from_millis(2_600)).await;
        let snap = store.snapshot(&conv_id()).unwrap();
        assert!(snap.status.transport_available);
        assert!(snap.status.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_failures_do_not_degrade() {
        let backend = MemoryBackend::new();
        backend.fail_next_fetches(2);
        let store = Arc::new(MessageStore::default());

        let (_tx, _sub) = spawn_scheduler(&backend, &store, SchedulerConfig::default());
        tokio::time::sleep(Duration::from_millis(2_700)).await;

        let snap = store.snapshot(&conv_id()).unwrap();
        assert!(snap.status.transport_available);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_message_appended_between_polls() {
        let backend = MemoryBackend::new();
        backend.set_push_connected(true);
        let store = Arc::new(MessageStore::default());

        let (_tx, _sub) = spawn_scheduler(&backend, &store, SchedulerConfig::default());
        tokio::time::sleep(Duration::from_millis(100)).await;

        backend.inject_push(&conv_id(), confirmed("srv-5", "pushed", 2_000));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snap = store.snapshot(&conv_id()).unwrap();
        assert_eq!(snap.state.messages.len(), 1);
        assert_eq!(snap.state.messages[0].id.as_str(), "srv-5");
        // Push is not authoritative, so the sync marker only moves on
        // polls.
        assert!(snap.state.last_synced_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_connected_backs_off_polling() {
        let backend = MemoryBackend::new();
        backend.set_push_connected(true);
        let store = Arc::new(MessageStore::default());

        let (_tx, _sub) = spawn_scheduler(&backend, &store, SchedulerConfig::default());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.fetch_count(), 1);

        // Well past the base interval but before the relaxed one.
        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(backend.fetch_count(), 1);

        // Polling is reduced, not disabled.
        tokio::time::sleep(Duration::from_millis(6_000)).await;
        assert_eq!(backend.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_completing_after_eviction_is_discarded() {
        let backend = MemoryBackend::new();
        backend.seed(&conv_id(), vec![confirmed("m1", "a", 10)]);
        backend.set_fetch_delay(Duration::from_secs(1));
        let store = Arc::new(MessageStore::default());

        let (tx, sub) = spawn_scheduler(&backend, &store, SchedulerConfig::default());
        // Let the first tick start its (slow) fetch.
        tokio::time::sleep(Duration::from_millis(10)).await;

        drop(sub);
        assert_eq!(store.release(&conv_id()), 0);
        drop(tx);
        assert!(!store.contains(&conv_id()));

        // The in-flight fetch completes, its result is thrown away,
        // and the evicted conversation stays gone.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!store.contains(&conv_id()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closing_commands_stops_the_loop() {
        let backend = MemoryBackend::new();
        let store = Arc::new(MessageStore::default());

        let (tx, _sub) = spawn_scheduler(&backend, &store, SchedulerConfig::default());
        tokio::time::sleep(Duration::from_millis(100)).await;
        let fetched = backend.fetch_count();

        drop(tx);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(backend.fetch_count(), fetched);
    }
}
