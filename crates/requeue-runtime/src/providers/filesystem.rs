//! # Filesystem Queue Provider
//!
//! Durable queue store in a local directory, for single-host deployments and
//! development.
//!
//! Layout under the configured root:
//!
//! ```text
//! queues/{percent-encoded queue path}/queue.json            queue metadata
//! queues/{percent-encoded queue path}/00000000000000000042.json   one message per lookup id
//! journal/{transaction id}.json                            commit records
//! ```
//!
//! A commit writes the staged deliveries as `.tmp` files, then writes a
//! journal record naming every rename and removal. The journal write is the
//! commit point: the record is applied and deleted afterwards, and a record
//! left behind by a crash is replayed when the provider is next opened.
//! Receive locks live in process memory.

use crate::address::QueuePath;
use crate::client::{receive_deadline, wait_for_next_attempt, QueueHandle, QueueProvider};
use crate::error::{QueueError, SerializationError};
use crate::message::{LookupAction, LookupId, Message, MessageId};
use crate::provider::{FilesystemConfig, ProviderType};
use crate::transaction::{StagedOperation, Transaction, TransactionId, TransactionResource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "filesystem_tests.rs"]
mod tests;

const QUEUES_DIR: &str = "queues";
const JOURNAL_DIR: &str = "journal";
const METADATA_FILE: &str = "queue.json";
const TEMP_SUFFIX: &str = ".tmp";

// ============================================================================
// On-disk records
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueMetadata {
    path: QueuePath,
    transactional: bool,
    next_lookup_id: u64,
}

/// Commit record; paths are relative to the provider root
#[derive(Debug, Serialize, Deserialize)]
struct JournalRecord {
    transaction: String,
    deliveries: Vec<JournalDelivery>,
    removals: Vec<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalDelivery {
    staged: PathBuf,
    target: PathBuf,
}

/// How far a commit got once its journal was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitState {
    Applied,

    /// Journal on disk, files not yet moved
    Journaled,
}

// ============================================================================
// FilesystemStore
// ============================================================================

/// Shared state of one provider root, also acting as the transaction resource
struct FilesystemStore {
    resource_id: String,
    root: PathBuf,
    locks: Mutex<HashMap<QueuePath, HashMap<LookupId, TransactionId>>>,
    commit_lock: tokio::sync::Mutex<()>,
}

impl FilesystemStore {
    fn queue_dir_name(path: &QueuePath) -> String {
        urlencoding::encode(path.as_str()).into_owned()
    }

    fn queue_relative(path: &QueuePath) -> PathBuf {
        Path::new(QUEUES_DIR).join(Self::queue_dir_name(path))
    }

    fn queue_dir(&self, path: &QueuePath) -> PathBuf {
        self.root.join(Self::queue_relative(path))
    }

    fn message_file_name(lookup_id: LookupId) -> String {
        format!("{:020}.json", lookup_id.value())
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<QueuePath, HashMap<LookupId, TransactionId>>> {
        match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn is_locked(&self, path: &QueuePath, lookup_id: LookupId) -> bool {
        self.locks()
            .get(path)
            .is_some_and(|held| held.contains_key(&lookup_id))
    }

    /// Lock the message to the transaction; false when someone else holds it
    fn try_lock(&self, path: &QueuePath, lookup_id: LookupId, tx: TransactionId) -> bool {
        let mut locks = self.locks();
        let held = locks.entry(path.clone()).or_default();
        if held.contains_key(&lookup_id) {
            return false;
        }
        held.insert(lookup_id, tx);
        true
    }

    fn release(&self, tx: TransactionId, operations: &[StagedOperation]) {
        let mut locks = self.locks();
        for operation in operations {
            if let StagedOperation::Receive { queue, lookup_id } = operation {
                if let Some(held) = locks.get_mut(queue) {
                    if held.get(lookup_id) == Some(&tx) {
                        held.remove(lookup_id);
                    }
                }
            }
        }
    }

    async fn read_metadata(&self, path: &QueuePath) -> Result<QueueMetadata, QueueError> {
        let file = self.queue_dir(path).join(METADATA_FILE);
        match fs::read(&file).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).map_err(SerializationError::from)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(QueueError::QueueNotFound {
                path: path.to_string(),
            }),
            Err(e) => Err(QueueError::io(file.display().to_string(), e)),
        }
    }

    async fn write_metadata(&self, metadata: &QueueMetadata) -> Result<(), QueueError> {
        let file = self.queue_dir(&metadata.path).join(METADATA_FILE);
        let json = serde_json::to_vec_pretty(metadata).map_err(SerializationError::from)?;
        write_atomic(&file, &json).await
    }

    /// Visible messages of a queue in lookup id order
    async fn load_messages(&self, path: &QueuePath) -> Result<Vec<Message>, QueueError> {
        let dir = self.queue_dir(path);
        let mut lookup_ids = Vec::new();

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(QueueError::QueueNotFound {
                    path: path.to_string(),
                })
            }
            Err(e) => return Err(QueueError::io(dir.display().to_string(), e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| QueueError::io(dir.display().to_string(), e))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(value) = name
                .strip_suffix(".json")
                .and_then(|stem| stem.parse::<u64>().ok())
            {
                lookup_ids.push(LookupId::new(value));
            }
        }
        lookup_ids.sort_unstable();

        let mut messages = Vec::with_capacity(lookup_ids.len());
        for lookup_id in lookup_ids {
            if self.is_locked(path, lookup_id) {
                continue;
            }

            let file = dir.join(Self::message_file_name(lookup_id));
            match fs::read(&file).await {
                Ok(bytes) => {
                    messages.push(serde_json::from_slice(&bytes).map_err(SerializationError::from)?)
                }
                // Removed by a commit since the directory was listed
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(QueueError::io(file.display().to_string(), e)),
            }
        }

        Ok(messages)
    }

    async fn apply(&self, record: &JournalRecord) -> Result<(), QueueError> {
        for delivery in &record.deliveries {
            let staged = self.root.join(&delivery.staged);
            let target = self.root.join(&delivery.target);
            match fs::rename(&staged, &target).await {
                Ok(()) => {}
                // Already applied before a crash
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && target.exists() => {}
                Err(e) => return Err(QueueError::io(staged.display().to_string(), e)),
            }
        }

        for removal in &record.removals {
            let file = self.root.join(removal);
            match fs::remove_file(&file).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(QueueError::io(file.display().to_string(), e)),
            }
        }

        Ok(())
    }

    /// Finish commits interrupted by a crash and drop uncommitted leftovers
    async fn recover(&self) -> Result<(), QueueError> {
        let journal_dir = self.root.join(JOURNAL_DIR);
        let mut replayed = 0usize;

        for file in list_files(&journal_dir).await? {
            let name = file.to_string_lossy().to_string();
            if name.ends_with(TEMP_SUFFIX) {
                remove_if_exists(&journal_dir.join(&file)).await?;
                continue;
            }

            let path = journal_dir.join(&file);
            let bytes = fs::read(&path)
                .await
                .map_err(|e| QueueError::io(path.display().to_string(), e))?;
            let record: JournalRecord =
                serde_json::from_slice(&bytes).map_err(SerializationError::from)?;

            self.apply(&record).await?;
            remove_if_exists(&path).await?;
            replayed += 1;
            info!(transaction = %record.transaction, "Replayed interrupted commit");
        }

        let queues_dir = self.root.join(QUEUES_DIR);
        for queue in list_files(&queues_dir).await? {
            let queue_dir = queues_dir.join(&queue);
            if !queue_dir.is_dir() {
                continue;
            }
            for file in list_files(&queue_dir).await? {
                if file.to_string_lossy().ends_with(TEMP_SUFFIX) {
                    debug!(file = %queue_dir.join(&file).display(), "Removing uncommitted file");
                    remove_if_exists(&queue_dir.join(&file)).await?;
                }
            }
        }

        if replayed > 0 {
            warn!(replayed, root = %self.root.display(), "Recovered interrupted commits");
        }
        Ok(())
    }

    async fn commit_locked(
        &self,
        transaction: TransactionId,
        operations: &[StagedOperation],
        staged_files: &mut Vec<PathBuf>,
    ) -> Result<CommitState, QueueError> {
        let mut record = JournalRecord {
            transaction: transaction.to_string(),
            deliveries: Vec::new(),
            removals: Vec::new(),
        };
        let mut metadata: HashMap<QueuePath, QueueMetadata> = HashMap::new();

        for operation in operations {
            match operation {
                StagedOperation::Receive { queue, lookup_id } => {
                    let held = self
                        .locks()
                        .get(queue)
                        .and_then(|held| held.get(lookup_id).copied());
                    let relative = Self::queue_relative(queue).join(Self::message_file_name(*lookup_id));
                    if held != Some(transaction) || !self.root.join(&relative).exists() {
                        return Err(QueueError::TransactionFailed {
                            message: format!(
                                "message {} in {} is no longer held by transaction {}",
                                lookup_id, queue, transaction
                            ),
                        });
                    }
                    record.removals.push(relative);
                }
                StagedOperation::Send { queue, message } => {
                    if !metadata.contains_key(queue) {
                        let loaded = self.read_metadata(queue).await?;
                        metadata.insert(queue.clone(), loaded);
                    }
                    let Some(meta) = metadata.get_mut(queue) else {
                        continue;
                    };

                    let lookup_id = LookupId::new(meta.next_lookup_id);
                    meta.next_lookup_id += 1;

                    let stored = message.assigned(MessageId::generate(lookup_id.value()), lookup_id);
                    let target =
                        Self::queue_relative(queue).join(Self::message_file_name(lookup_id));
                    let staged = with_suffix(&target, TEMP_SUFFIX);

                    let json = serde_json::to_vec_pretty(&stored).map_err(SerializationError::from)?;
                    staged_files.push(self.root.join(&staged));
                    write_file(&self.root.join(&staged), &json).await?;

                    record.deliveries.push(JournalDelivery { staged, target });
                }
            }
        }

        // Skipped lookup ids after a failure are harmless; reused ones are not
        for meta in metadata.values() {
            self.write_metadata(meta).await?;
        }

        let journal = self
            .root
            .join(JOURNAL_DIR)
            .join(format!("{}.json", transaction));
        let json = serde_json::to_vec_pretty(&record).map_err(SerializationError::from)?;
        write_atomic(&journal, &json).await?;
        staged_files.clear();

        // Past the commit point: an apply failure is finished by the next recovery
        if let Err(e) = self.apply(&record).await {
            warn!(
                transaction = %transaction,
                journal = %journal.display(),
                error = %e,
                "Commit recorded but not applied, holding receive locks until replay"
            );
            return Ok(CommitState::Journaled);
        }
        if let Err(e) = remove_if_exists(&journal).await {
            warn!(journal = %journal.display(), error = %e, "Failed to remove applied journal");
        }

        Ok(CommitState::Applied)
    }
}

#[async_trait]
impl TransactionResource for FilesystemStore {
    fn resource_id(&self) -> &str {
        &self.resource_id
    }

    async fn commit(
        &self,
        transaction: TransactionId,
        operations: &[StagedOperation],
    ) -> Result<(), QueueError> {
        let _guard = self.commit_lock.lock().await;
        let mut staged_files = Vec::new();

        let result = self
            .commit_locked(transaction, operations, &mut staged_files)
            .await;

        // Anything still listed here was written before the commit point
        for file in staged_files {
            if let Err(e) = remove_if_exists(&file).await {
                warn!(file = %file.display(), error = %e, "Failed to remove staged file");
            }
        }

        match result {
            Ok(CommitState::Applied) => {
                self.release(transaction, operations);
                Ok(())
            }
            // Received files are still on disk; their locks keep them hidden
            Ok(CommitState::Journaled) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn rollback(&self, transaction: TransactionId, operations: &[StagedOperation]) {
        self.release(transaction, operations);
    }
}

// ============================================================================
// FilesystemProvider
// ============================================================================

/// Durable queue provider backed by a local directory
pub struct FilesystemProvider {
    store: Arc<FilesystemStore>,
    config: FilesystemConfig,
}

impl FilesystemProvider {
    /// Open the store at the configured root, creating it when missing
    ///
    /// Interrupted commits found in the journal are completed first.
    pub async fn new(config: FilesystemConfig) -> Result<Self, QueueError> {
        for dir in [QUEUES_DIR, JOURNAL_DIR] {
            let path = config.root.join(dir);
            fs::create_dir_all(&path)
                .await
                .map_err(|e| QueueError::io(path.display().to_string(), e))?;
        }

        let store = Arc::new(FilesystemStore {
            resource_id: format!("filesystem:{}", config.root.display()),
            root: config.root.clone(),
            locks: Mutex::new(HashMap::new()),
            commit_lock: tokio::sync::Mutex::new(()),
        });
        store.recover().await?;

        debug!(root = %config.root.display(), "Opened filesystem queue store");
        Ok(Self { store, config })
    }

    pub fn root(&self) -> &Path {
        &self.store.root
    }

    /// Put a message straight onto a queue, outside any transaction
    pub async fn enqueue(&self, path: &QueuePath, message: Message) -> Result<Message, QueueError> {
        let _guard = self.store.commit_lock.lock().await;
        let mut metadata = self.store.read_metadata(path).await?;

        let lookup_id = LookupId::new(metadata.next_lookup_id);
        metadata.next_lookup_id += 1;
        self.store.write_metadata(&metadata).await?;

        let stored = message.assigned(MessageId::generate(lookup_id.value()), lookup_id);
        let json = serde_json::to_vec_pretty(&stored).map_err(SerializationError::from)?;
        let file = self
            .store
            .queue_dir(path)
            .join(FilesystemStore::message_file_name(lookup_id));
        write_atomic(&file, &json).await?;

        Ok(stored)
    }

    fn handle(&self, metadata: QueueMetadata) -> Arc<dyn QueueHandle> {
        Arc::new(FilesystemQueueHandle {
            path: metadata.path,
            transactional: metadata.transactional,
            store: Arc::clone(&self.store),
            poll_interval: self.config.poll_interval(),
        })
    }
}

#[async_trait]
impl QueueProvider for FilesystemProvider {
    async fn open_queue(&self, path: &QueuePath) -> Result<Arc<dyn QueueHandle>, QueueError> {
        let metadata = self.store.read_metadata(path).await?;
        Ok(self.handle(metadata))
    }

    async fn create_queue(
        &self,
        path: &QueuePath,
        transactional: bool,
    ) -> Result<Arc<dyn QueueHandle>, QueueError> {
        let _guard = self.store.commit_lock.lock().await;

        match self.store.read_metadata(path).await {
            Ok(existing) => return Ok(self.handle(existing)),
            Err(QueueError::QueueNotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let dir = self.store.queue_dir(path);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| QueueError::io(dir.display().to_string(), e))?;

        let metadata = QueueMetadata {
            path: path.clone(),
            transactional,
            next_lookup_id: 1,
        };
        self.store.write_metadata(&metadata).await?;

        info!(queue = %path, transactional, "Created queue");
        Ok(self.handle(metadata))
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Filesystem
    }
}

// ============================================================================
// FilesystemQueueHandle
// ============================================================================

/// Handle to one queue directory
pub struct FilesystemQueueHandle {
    path: QueuePath,
    transactional: bool,
    store: Arc<FilesystemStore>,
    poll_interval: Duration,
}

impl FilesystemQueueHandle {
    fn begin(&self, tx: &mut Transaction) -> Result<(), QueueError> {
        if !self.transactional {
            return Err(QueueError::NotTransactional {
                path: self.path.to_string(),
            });
        }
        tx.enlist(self.store.clone())
    }

    fn take(&self, message: &Message, tx: &mut Transaction) -> bool {
        if !self.store.try_lock(&self.path, message.lookup_id, tx.id()) {
            return false;
        }
        tx.stage(StagedOperation::Receive {
            queue: self.path.clone(),
            lookup_id: message.lookup_id,
        });
        true
    }
}

#[async_trait]
impl QueueHandle for FilesystemQueueHandle {
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
            let messages = self.store.load_messages(&self.path).await?;
            if let Some(message) = messages.into_iter().find(|m| m.id == *id) {
                if self.take(&message, tx) {
                    return Ok(message);
                }
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

        let messages = self.store.load_messages(&self.path).await?;
        let visible: Vec<LookupId> = messages.iter().map(|m| m.lookup_id).collect();

        let selected = action
            .select(lookup_id, &visible)
            .and_then(|selected| messages.into_iter().find(|m| m.lookup_id == selected));

        match selected {
            Some(message) if self.take(&message, tx) => Ok(message),
            _ => Err(QueueError::MessageNotFound {
                message: format!("{:?} lookup id {} in {}", action, lookup_id, self.path),
            }),
        }
    }

    async fn send(&self, message: &Message, tx: &mut Transaction) -> Result<(), QueueError> {
        self.begin(tx)?;
        tx.stage(StagedOperation::Send {
            queue: self.path.clone(),
            message: message.clone(),
        });
        Ok(())
    }

    async fn peek_all(&self) -> Result<Vec<Message>, QueueError> {
        self.store.load_messages(&self.path).await
    }
}

// ============================================================================
// File helpers
// ============================================================================

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<(), QueueError> {
    let io_error = |e| QueueError::io(path.display().to_string(), e);

    let mut file = fs::File::create(path).await.map_err(io_error)?;
    file.write_all(contents).await.map_err(io_error)?;
    file.flush().await.map_err(io_error)?;
    file.sync_all().await.map_err(io_error)?;
    Ok(())
}

/// Write to a temporary file first, then rename over the target
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), QueueError> {
    let temp = with_suffix(path, TEMP_SUFFIX);
    write_file(&temp, contents).await?;
    fs::rename(&temp, path)
        .await
        .map_err(|e| QueueError::io(path.display().to_string(), e))
}

async fn remove_if_exists(path: &Path) -> Result<(), QueueError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(QueueError::io(path.display().to_string(), e)),
    }
}

async fn list_files(dir: &Path) -> Result<Vec<OsString>, QueueError> {
    let io_error = |e| QueueError::io(dir.display().to_string(), e);

    let mut names = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(io_error(e)),
    };
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        names.push(entry.file_name());
    }
    names.sort();
    Ok(names)
}
