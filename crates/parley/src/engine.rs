//! The engine facade: subscriptions, optimistic sends, scheduling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use parley_core::{
    now_millis, ConversationId, ErrorKind, MergeOp, Message, MessageId, MessageRole,
};
use parley_store::{ConversationSnapshot, MessageStore, DEFAULT_GRACE_WINDOW_MS};
use parley_sync::{
    OutgoingMessage, SchedulerCommand, SchedulerConfig, SyncScheduler, Transport,
};

use crate::error::{EngineError, Result};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Polling and suspension behavior of per-conversation schedulers.
    pub scheduler: SchedulerConfig,
    /// How long a pending message may wait for its server echo before
    /// a refresh settles it as a failed send.
    pub grace_window_ms: i64,
    /// Bounded wait for a send response.
    pub send_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            grace_window_ms: DEFAULT_GRACE_WINDOW_MS,
            send_timeout: Duration::from_secs(10),
        }
    }
}

/// Proof that a send round-tripped: the provisional id the caller saw
/// immediately, and the confirmed message that replaced it.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub provisional_id: MessageId,
    pub confirmed: Message,
}

/// Shared between the engine and live subscriptions so dropping a
/// subscription can tear down scheduling without a handle back to the
/// (transport-generic) engine.
struct Registry {
    store: Arc<MessageStore>,
    schedulers: Mutex<HashMap<ConversationId, mpsc::Sender<SchedulerCommand>>>,
}

impl Registry {
    fn release(&self, conversation_id: &ConversationId) {
        if self.store.release(conversation_id) == 0 {
            // Dropping the sender closes the command channel, which
            // stops the scheduler task.
            self.schedulers
                .lock()
                .unwrap()
                .remove(conversation_id);
            tracing::debug!(conversation = %conversation_id, "conversation evicted");
        }
    }

    fn scheduler_tx(
        &self,
        conversation_id: &ConversationId,
    ) -> Option<mpsc::Sender<SchedulerCommand>> {
        self.schedulers.lock().unwrap().get(conversation_id).cloned()
    }
}

/// A live, refcounted view of one conversation.
///
/// Holding a subscription keeps the conversation resident and its
/// scheduler running. Dropping the last subscription evicts both.
pub struct Subscription {
    conversation_id: ConversationId,
    rx: watch::Receiver<Arc<ConversationSnapshot>>,
    registry: Arc<Registry>,
}

impl Subscription {
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// The most recent snapshot, available immediately on subscribe.
    pub fn current(&self) -> Arc<ConversationSnapshot> {
        self.rx.borrow().clone()
    }

    /// Wait for the next snapshot. Returns `None` once the
    /// conversation has been evicted out from under the stream.
    pub async fn next(&mut self) -> Option<Arc<ConversationSnapshot>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Release this subscription now instead of at drop time.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.release(&self.conversation_id);
    }
}

/// The conversation sync engine.
///
/// Owns the message store and one scheduler task per observed
/// conversation; generic over the [`Transport`] that reaches the
/// server.
pub struct SyncEngine<T: Transport> {
    transport: Arc<T>,
    registry: Arc<Registry>,
    config: EngineConfig,
}

impl<T: Transport> Clone for SyncEngine<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            registry: Arc::clone(&self.registry),
            config: self.config.clone(),
        }
    }
}

impl<T: Transport> SyncEngine<T> {
    pub fn new(transport: Arc<T>, config: EngineConfig) -> Self {
        let store = Arc::new(MessageStore::new(config.grace_window_ms));
        Self {
            transport,
            registry: Arc::new(Registry {
                store,
                schedulers: Mutex::new(HashMap::new()),
            }),
            config,
        }
    }

    pub fn with_defaults(transport: Arc<T>) -> Self {
        Self::new(transport, EngineConfig::default())
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.registry.store
    }

    /// Subscribe to a conversation.
    ///
    /// The first subscriber spawns the polling scheduler, which fetches
    /// immediately; later subscribers share the running one. The
    /// returned stream replays the current snapshot before any new
    /// merges.
    pub fn observe(&self, conversation_id: &ConversationId) -> Subscription {
        let (rx, subscribers) = self.registry.store.subscribe(conversation_id);
        if subscribers == 1 {
            let (tx, cmd_rx) = mpsc::channel(16);
            self.registry
                .schedulers
                .lock()
                .unwrap()
                .insert(conversation_id.clone(), tx);
            let scheduler = SyncScheduler::new(
                conversation_id.clone(),
                Arc::clone(&self.registry.store),
                Arc::clone(&self.transport),
                self.config.scheduler.clone(),
            );
            tokio::spawn(scheduler.run(cmd_rx));
        }
        Subscription {
            conversation_id: conversation_id.clone(),
            rx,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Send a user message.
    ///
    /// The message appears in the conversation immediately as pending;
    /// polling is suspended while the send is in flight. On
    /// confirmation the pending message is replaced in place and a
    /// refresh runs right away. On transport failure it is marked
    /// failed but kept visible. On timeout it stays pending, since the
    /// server may still have accepted it.
    pub async fn send(
        &self,
        conversation_id: &ConversationId,
        content: impl Into<String>,
    ) -> Result<SendReceipt> {
        let provisional = Message::provisional(
            conversation_id.clone(),
            MessageRole::User,
            content,
            now_millis(),
        )?;
        let provisional_id = provisional.id.clone();
        let outgoing = OutgoingMessage::from_message(&provisional);

        // Resident-only: sending into a conversation nobody observes
        // must not create store state that nothing will ever release.
        self.registry.store.merge_if_resident(
            conversation_id,
            MergeOp::OptimisticInsert { message: provisional },
        );

        let cmd = self.registry.scheduler_tx(conversation_id);
        if let Some(tx) = &cmd {
            let _ = tx.send(SchedulerCommand::Suspend).await;
        }

        let sent = tokio::time::timeout(
            self.config.send_timeout,
            self.transport.send_message(conversation_id, &outgoing),
        )
        .await;

        match sent {
            Ok(Ok(confirmed)) => {
                self.registry.store.merge_if_resident(
                    conversation_id,
                    MergeOp::ReconcileProvisional {
                        provisional_id: provisional_id.clone(),
                        confirmed: confirmed.clone(),
                    },
                );
                if let Some(tx) = &cmd {
                    let _ = tx.send(SchedulerCommand::Resume { fetch_now: true }).await;
                }
                Ok(SendReceipt {
                    provisional_id,
                    confirmed,
                })
            }
            Ok(Err(source)) => {
                self.registry.store.merge_if_resident(
                    conversation_id,
                    MergeOp::MarkFailed {
                        provisional_id: provisional_id.clone(),
                    },
                );
                self.registry.store.update_status(conversation_id, |s| {
                    s.record_error(ErrorKind::TransportUnavailable)
                });
                if let Some(tx) = &cmd {
                    let _ = tx
                        .send(SchedulerCommand::Resume { fetch_now: false })
                        .await;
                }
                tracing::warn!(
                    conversation = %conversation_id,
                    provisional = %provisional_id,
                    error = %source,
                    "send failed"
                );
                Err(EngineError::SendFailed {
                    provisional_id,
                    source,
                })
            }
            Err(_) => {
                let timeout_ms = self.config.send_timeout.as_millis() as i64;
                self.registry.store.update_status(conversation_id, |s| {
                    s.record_error(ErrorKind::SendTimeout)
                });
                // fetch_now: a refresh may find the server-side echo
                // and confirm the still-pending message.
                if let Some(tx) = &cmd {
                    let _ = tx.send(SchedulerCommand::Resume { fetch_now: true }).await;
                }
                tracing::warn!(
                    conversation = %conversation_id,
                    provisional = %provisional_id,
                    timeout_ms,
                    "send timed out, message left pending"
                );
                Err(EngineError::SendTimedOut {
                    provisional_id,
                    timeout_ms,
                })
            }
        }
    }
}
