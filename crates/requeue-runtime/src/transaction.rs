//! Transaction scopes spanning several queue operations.
//!
//! A [`Transaction`] collects the operations queue handles perform on its
//! behalf and hands them to the provider's [`TransactionResource`] on commit,
//! which applies them all or none. Receives lock their message to the
//! transaction immediately so no other consumer can see it; sends stay
//! invisible until commit. Dropping a transaction without committing rolls
//! it back.

use crate::address::QueuePath;
use crate::error::QueueError;
use crate::message::{LookupId, Message};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Unique identifier of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(uuid::Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An operation waiting for its transaction to commit
#[derive(Debug, Clone)]
pub enum StagedOperation {
    /// Deliver the message to the queue
    Send { queue: QueuePath, message: Message },
    /// Remove the (already locked) message from the queue
    Receive { queue: QueuePath, lookup_id: LookupId },
}

/// Provider side of a transaction
#[async_trait]
pub trait TransactionResource: Send + Sync {
    /// Stable identity used to refuse enlisting two different resources
    fn resource_id(&self) -> &str;

    /// Apply every operation, or none of them
    async fn commit(
        &self,
        transaction: TransactionId,
        operations: &[StagedOperation],
    ) -> Result<(), QueueError>;

    /// Release whatever the transaction holds (receive locks)
    fn rollback(&self, transaction: TransactionId, operations: &[StagedOperation]);
}

/// Unit of atomic work over one or more queues of a single provider
pub struct Transaction {
    id: TransactionId,
    resource: Option<Arc<dyn TransactionResource>>,
    operations: Vec<StagedOperation>,
    finished: bool,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            id: TransactionId::new(),
            resource: None,
            operations: Vec::new(),
            finished: false,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn operations(&self) -> &[StagedOperation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Attach the resource that will apply this transaction's operations
    ///
    /// Enlisting the same resource again is a no-op.
    pub fn enlist(&mut self, resource: Arc<dyn TransactionResource>) -> Result<(), QueueError> {
        match &self.resource {
            Some(existing) if existing.resource_id() == resource.resource_id() => Ok(()),
            Some(existing) => Err(QueueError::TransactionFailed {
                message: format!(
                    "transaction {} already enlisted in '{}', cannot also enlist '{}'",
                    self.id,
                    existing.resource_id(),
                    resource.resource_id()
                ),
            }),
            None => {
                self.resource = Some(resource);
                Ok(())
            }
        }
    }

    pub fn stage(&mut self, operation: StagedOperation) {
        self.operations.push(operation);
    }

    /// Apply all staged operations atomically
    ///
    /// On failure everything is rolled back before the error is returned.
    pub async fn commit(mut self) -> Result<(), QueueError> {
        self.finished = true;

        let Some(resource) = self.resource.clone() else {
            debug!(transaction = %self.id, "Committed empty transaction");
            return Ok(());
        };

        let operations = std::mem::take(&mut self.operations);
        if let Err(e) = resource.commit(self.id, &operations).await {
            warn!(transaction = %self.id, error = %e, "Commit failed, rolling back");
            resource.rollback(self.id, &operations);
            return Err(e);
        }

        debug!(
            transaction = %self.id,
            operations = operations.len(),
            "Committed transaction"
        );
        Ok(())
    }

    /// Discard all staged operations and release locks
    pub fn rollback(self) {
        drop(self);
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        if let Some(resource) = &self.resource {
            debug!(
                transaction = %self.id,
                operations = self.operations.len(),
                "Rolling back transaction"
            );
            resource.rollback(self.id, &self.operations);
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field(
                "resource",
                &self.resource.as_ref().map(|r| r.resource_id().to_string()),
            )
            .field("operations", &self.operations.len())
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
#[path = "transaction_tests.rs"]
mod tests;
