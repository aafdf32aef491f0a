//! In-memory queue provider implementation for testing and development.
//!
//! This module provides a fully functional in-memory queue implementation that:
//! - Honours transaction scopes (receive locks, staged sends, atomic commit)
//! - Assigns ids and never reuses lookup ids, even across purges
//! - Provides thread-safe concurrent access
//! - Can inject send and commit failures
//!
//! This provider is intended for:
//! - Unit testing of requeue operations
//! - Reference implementation for durable providers

use crate::address::QueuePath;
use crate::client::{receive_deadline, wait_for_next_attempt, QueueHandle, QueueProvider};
use crate::error::QueueError;
use crate::message::{LookupAction, LookupId, Message, MessageId};
use crate::provider::{InMemoryConfig, ProviderType};
use crate::transaction::{StagedOperation, Transaction, TransactionId, TransactionResource};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all queues
#[derive(Default)]
struct QueueStorage {
    queues: HashMap<QueuePath, InMemoryQueue>,
    failing_sends: HashSet<QueuePath>,
    fail_next_commit: bool,
}

impl QueueStorage {
    fn queue(&self, path: &QueuePath) -> Result<&InMemoryQueue, QueueError> {
        self.queues.get(path).ok_or_else(|| QueueError::QueueNotFound {
            path: path.to_string(),
        })
    }

    fn queue_mut(&mut self, path: &QueuePath) -> Result<&mut InMemoryQueue, QueueError> {
        self.queues
            .get_mut(path)
            .ok_or_else(|| QueueError::QueueNotFound {
                path: path.to_string(),
            })
    }
}

/// Internal queue state for a single queue
struct InMemoryQueue {
    transactional: bool,
    messages: BTreeMap<LookupId, StoredMessage>,
    next_lookup_id: u64,
}

impl InMemoryQueue {
    fn new(transactional: bool) -> Self {
        Self {
            transactional,
            messages: BTreeMap::new(),
            next_lookup_id: 1,
        }
    }

    /// Accept a message under a fresh identity
    fn append(&mut self, message: &Message) -> Message {
        let lookup_id = LookupId::new(self.next_lookup_id);
        self.next_lookup_id += 1;

        let stored = message.assigned(MessageId::generate(lookup_id.value()), lookup_id);
        self.messages.insert(
            lookup_id,
            StoredMessage {
                message: stored.clone(),
                locked_by: None,
            },
        );
        stored
    }

    fn visible(&self) -> impl Iterator<Item = &StoredMessage> {
        self.messages.values().filter(|m| m.locked_by.is_none())
    }
}

/// A message stored in the queue with its lock state
struct StoredMessage {
    message: Message,
    locked_by: Option<TransactionId>,
}

/// Shared state, also acting as the transaction resource
struct InMemoryResource {
    resource_id: String,
    storage: RwLock<QueueStorage>,
}

impl InMemoryResource {
    fn read(&self) -> Result<RwLockReadGuard<'_, QueueStorage>, QueueError> {
        self.storage.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, QueueStorage>, QueueError> {
        self.storage.write().map_err(|_| poisoned())
    }
}

fn poisoned() -> QueueError {
    QueueError::ConnectionFailed {
        message: "in-memory queue storage lock poisoned".to_string(),
    }
}

#[async_trait]
impl TransactionResource for InMemoryResource {
    fn resource_id(&self) -> &str {
        &self.resource_id
    }

    async fn commit(
        &self,
        transaction: TransactionId,
        operations: &[StagedOperation],
    ) -> Result<(), QueueError> {
        let mut storage = self.write()?;

        if storage.fail_next_commit {
            storage.fail_next_commit = false;
            return Err(QueueError::TransactionFailed {
                message: format!("injected commit failure for transaction {}", transaction),
            });
        }

        // Validate everything before touching any queue
        for operation in operations {
            match operation {
                StagedOperation::Receive { queue, lookup_id } => {
                    let held = storage
                        .queue(queue)?
                        .messages
                        .get(lookup_id)
                        .is_some_and(|m| m.locked_by == Some(transaction));
                    if !held {
                        return Err(QueueError::TransactionFailed {
                            message: format!(
                                "message {} in {} is no longer held by transaction {}",
                                lookup_id, queue, transaction
                            ),
                        });
                    }
                }
                StagedOperation::Send { queue, .. } => {
                    storage.queue(queue)?;
                }
            }
        }

        for operation in operations {
            match operation {
                StagedOperation::Receive { queue, lookup_id } => {
                    storage.queue_mut(queue)?.messages.remove(lookup_id);
                }
                StagedOperation::Send { queue, message } => {
                    let stored = storage.queue_mut(queue)?.append(message);
                    debug!(queue = %queue, message_id = %stored.id, "Delivered message");
                }
            }
        }

        Ok(())
    }

    fn rollback(&self, transaction: TransactionId, operations: &[StagedOperation]) {
        let mut storage = match self.storage.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        for operation in operations {
            if let StagedOperation::Receive { queue, lookup_id } = operation {
                if let Some(stored) = storage
                    .queues
                    .get_mut(queue)
                    .and_then(|q| q.messages.get_mut(lookup_id))
                {
                    if stored.locked_by == Some(transaction) {
                        stored.locked_by = None;
                    }
                }
            }
        }
    }
}

// ============================================================================
// InMemoryProvider
// ============================================================================

/// In-memory queue provider implementation
pub struct InMemoryProvider {
    resource: Arc<InMemoryResource>,
    config: InMemoryConfig,
}

impl InMemoryProvider {
    /// Create new in-memory provider with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            resource: Arc::new(InMemoryResource {
                resource_id: format!("memory:{}", uuid::Uuid::new_v4()),
                storage: RwLock::new(QueueStorage::default()),
            }),
            config,
        }
    }

    /// Put a message straight onto a queue, outside any transaction
    ///
    /// Returns the message as stored, with its assigned id and lookup id.
    pub fn enqueue(&self, path: &QueuePath, message: Message) -> Result<Message, QueueError> {
        let mut storage = self.resource.write()?;
        Ok(storage.queue_mut(path)?.append(&message))
    }

    /// Remove every message; lookup ids keep counting from where they were
    pub fn purge_queue(&self, path: &QueuePath) -> Result<usize, QueueError> {
        let mut storage = self.resource.write()?;
        let queue = storage.queue_mut(path)?;
        let purged = queue.messages.len();
        queue.messages.clear();
        Ok(purged)
    }

    /// Number of messages in the queue, including locked ones
    pub fn message_count(&self, path: &QueuePath) -> Result<usize, QueueError> {
        Ok(self.resource.read()?.queue(path)?.messages.len())
    }

    /// Make every send to the queue fail with a connection error
    pub fn fail_sends_to(&self, path: &QueuePath) -> Result<(), QueueError> {
        self.resource.write()?.failing_sends.insert(path.clone());
        Ok(())
    }

    /// Make the next commit of any transaction fail
    pub fn fail_next_commit(&self) -> Result<(), QueueError> {
        self.resource.write()?.fail_next_commit = true;
        Ok(())
    }

    fn handle(&self, path: &QueuePath, transactional: bool) -> Arc<dyn QueueHandle> {
        Arc::new(InMemoryQueueHandle {
            path: path.clone(),
            transactional,
            resource: Arc::clone(&self.resource),
            poll_interval: self.config.poll_interval(),
        })
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl QueueProvider for InMemoryProvider {
    async fn open_queue(&self, path: &QueuePath) -> Result<Arc<dyn QueueHandle>, QueueError> {
        let transactional = self.resource.read()?.queue(path)?.transactional;
        Ok(self.handle(path, transactional))
    }

    async fn create_queue(
        &self,
        path: &QueuePath,
        transactional: bool,
    ) -> Result<Arc<dyn QueueHandle>, QueueError> {
        let transactional = {
            let mut storage = self.resource.write()?;
            storage
                .queues
                .entry(path.clone())
                .or_insert_with(|| InMemoryQueue::new(transactional))
                .transactional
        };
        Ok(self.handle(path, transactional))
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

// ============================================================================
// InMemoryQueueHandle
// ============================================================================

/// Handle to one in-memory queue
pub struct InMemoryQueueHandle {
    path: QueuePath,
    transactional: bool,
    resource: Arc<InMemoryResource>,
    poll_interval: Duration,
}

impl InMemoryQueueHandle {
    fn begin(&self, tx: &mut Transaction) -> Result<(), QueueError> {
        if !self.transactional {
            return Err(QueueError::NotTransactional {
                path: self.path.to_string(),
            });
        }
        tx.enlist(self.resource.clone())
    }

    fn lock(
        &self,
        tx: &mut Transaction,
        select: impl FnOnce(&InMemoryQueue) -> Option<LookupId>,
    ) -> Result<Option<Message>, QueueError> {
        let mut storage = self.resource.write()?;
        let queue = storage.queue_mut(&self.path)?;

        let Some(lookup_id) = select(queue) else {
            return Ok(None);
        };
        let Some(stored) = queue.messages.get_mut(&lookup_id) else {
            return Ok(None);
        };

        stored.locked_by = Some(tx.id());
        let message = stored.message.clone();
        tx.stage(StagedOperation::Receive {
            queue: self.path.clone(),
            lookup_id,
        });
        Ok(Some(message))
    }
}

#[async_trait]
impl QueueHandle for InMemoryQueueHandle {
    fn path(&self) -> &QueuePath {
        &self.path
    }

    fn is_transactional(&self) -> bool {
        self.transactional
    }

    async fn receive_by_id(
        &self,
        id: &MessageId,
        timeout: Duration,
        tx: &mut Transaction,
    ) -> Result<Message, QueueError> {
        self.begin(tx)?;
        let deadline = receive_deadline(timeout);

        loop {
            let found = self.lock(tx, |queue| {
                queue
                    .visible()
                    .find(|m| m.message.id == *id)
                    .map(|m| m.message.lookup_id)
            })?;

            if let Some(message) = found {
                return Ok(message);
            }

            if !wait_for_next_attempt(deadline, self.poll_interval).await {
                debug!(queue = %self.path, message_id = %id, "Receive by id timed out");
                return Err(QueueError::Timeout { duration: timeout });
            }
        }
    }

    async fn receive_by_lookup_id(
        &self,
        action: LookupAction,
        lookup_id: LookupId,
        tx: &mut Transaction,
    ) -> Result<Message, QueueError> {
        self.begin(tx)?;

        let found = self.lock(tx, |queue| {
            let visible: Vec<LookupId> = queue.visible().map(|m| m.message.lookup_id).collect();
            action.select(lookup_id, &visible)
        })?;

        found.ok_or_else(|| QueueError::MessageNotFound {
            message: format!("{:?} lookup id {} in {}", action, lookup_id, self.path),
        })
    }

    async fn send(&self, message: &Message, tx: &mut Transaction) -> Result<(), QueueError> {
        self.begin(tx)?;

        {
            let storage = self.resource.read()?;
            storage.queue(&self.path)?;
            if storage.failing_sends.contains(&self.path) {
                warn!(queue = %self.path, "Injected send failure");
                return Err(QueueError::ConnectionFailed {
                    message: format!("send to {} failed", self.path),
                });
            }
        }

        tx.stage(StagedOperation::Send {
            queue: self.path.clone(),
            message: message.clone(),
        });
        Ok(())
    }

    async fn peek_all(&self) -> Result<Vec<Message>, QueueError> {
        let storage = self.resource.read()?;
        Ok(storage
            .queue(&self.path)?
            .visible()
            .map(|m| m.message.clone())
            .collect())
    }
}
