//! Provider and queue handle traits.

use crate::address::QueuePath;
use crate::error::QueueError;
use crate::message::{LookupAction, LookupId, Message, MessageId};
use crate::provider::{ProviderConfig, ProviderType};
use crate::providers::{FilesystemProvider, InMemoryProvider};
use crate::transaction::Transaction;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Interface implemented by specific queue providers
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Open an existing queue
    async fn open_queue(&self, path: &QueuePath) -> Result<Arc<dyn QueueHandle>, QueueError>;

    /// Create a queue, or open it when it already exists
    async fn create_queue(
        &self,
        path: &QueuePath,
        transactional: bool,
    ) -> Result<Arc<dyn QueueHandle>, QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}

/// Handle to one queue of a provider
#[async_trait]
pub trait QueueHandle: Send + Sync {
    /// Connection path the handle was opened with
    fn path(&self) -> &QueuePath;

    /// Whether the queue accepts transactional operations
    fn is_transactional(&self) -> bool;

    /// Receive the message with the given id inside the transaction
    ///
    /// Waits up to `timeout` for the message to become visible and fails with
    /// [`QueueError::Timeout`] when it does not.
    async fn receive_by_id(
        &self,
        id: &MessageId,
        timeout: Duration,
        tx: &mut Transaction,
    ) -> Result<Message, QueueError>;

    /// Receive a message by its position in the queue, without waiting
    async fn receive_by_lookup_id(
        &self,
        action: LookupAction,
        lookup_id: LookupId,
        tx: &mut Transaction,
    ) -> Result<Message, QueueError>;

    /// Stage a copy of the message for delivery to this queue
    ///
    /// The queue assigns a new id and lookup id when the transaction commits.
    async fn send(&self, message: &Message, tx: &mut Transaction) -> Result<(), QueueError>;

    /// Snapshot of the visible messages in lookup id order, without removing them
    async fn peek_all(&self) -> Result<Vec<Message>, QueueError>;
}

/// Factory for creating providers from configuration
pub struct QueueProviderFactory;

impl QueueProviderFactory {
    /// Create provider from configuration
    pub async fn create_provider(
        config: &ProviderConfig,
    ) -> Result<Arc<dyn QueueProvider>, QueueError> {
        let provider: Arc<dyn QueueProvider> = match config {
            ProviderConfig::Filesystem(fs_config) => {
                Arc::new(FilesystemProvider::new(fs_config.clone()).await?)
            }
            ProviderConfig::InMemory(memory_config) => {
                Arc::new(InMemoryProvider::new(memory_config.clone()))
            }
        };

        Ok(provider)
    }
}

/// Deadline for a blocking receive; `None` when the timeout is too large to
/// represent and the receive waits indefinitely
pub(crate) fn receive_deadline(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Sleep until the next poll attempt of a blocking receive
///
/// Returns `false` without sleeping once the deadline has passed.
pub(crate) async fn wait_for_next_attempt(deadline: Option<Instant>, interval: Duration) -> bool {
    let Some(deadline) = deadline else {
        tokio::time::sleep(interval).await;
        return true;
    };

    let now = Instant::now();
    if now >= deadline {
        return false;
    }

    tokio::time::sleep(interval.min(deadline - now)).await;
    true
}
