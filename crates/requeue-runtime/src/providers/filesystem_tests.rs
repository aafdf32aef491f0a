//! Tests for the filesystem queue provider.

use super::*;
use bytes::Bytes;
use tempfile::TempDir;

fn error_queue() -> QueuePath {
    QueuePath::new("FormatName:DIRECT=OS:localhost\\private$\\error")
}

fn orders_queue() -> QueuePath {
    QueuePath::new("FormatName:DIRECT=OS:localhost\\private$\\orders")
}

fn config(dir: &TempDir) -> FilesystemConfig {
    FilesystemConfig {
        root: dir.path().to_path_buf(),
        poll_interval_ms: 5,
    }
}

async fn provider_with_queues(dir: &TempDir) -> FilesystemProvider {
    let provider = FilesystemProvider::new(config(dir)).await.unwrap();
    provider.create_queue(&error_queue(), true).await.unwrap();
    provider.create_queue(&orders_queue(), true).await.unwrap();
    provider
}

// ============================================================================
// Layout Tests
// ============================================================================

mod layout {
    use super::*;

    /// Verify that queue directories use the percent-encoded path.
    #[tokio::test]
    async fn test_queue_directory_is_percent_encoded() {
        let dir = TempDir::new().unwrap();
        provider_with_queues(&dir).await;

        let expected = dir
            .path()
            .join("queues")
            .join("FormatName%3ADIRECT%3DOS%3Alocalhost%5Cprivate%24%5Cerror");
        assert!(expected.join("queue.json").is_file());
    }

    /// Verify that a message is stored as one JSON file named by lookup id.
    #[tokio::test]
    async fn test_message_file_named_by_lookup_id() {
        let dir = TempDir::new().unwrap();
        let provider = provider_with_queues(&dir).await;

        let stored = provider
            .enqueue(&error_queue(), Message::new(Bytes::from("body")))
            .await
            .unwrap();
        assert_eq!(stored.lookup_id, LookupId::new(1));

        let file = dir
            .path()
            .join(FilesystemStore::queue_relative(&error_queue()))
            .join("00000000000000000001.json");
        let on_disk: Message = serde_json::from_slice(&std::fs::read(file).unwrap()).unwrap();
        assert_eq!(on_disk, stored);
    }

    /// Verify that create_queue keeps the settings of an existing queue.
    #[tokio::test]
    async fn test_create_existing_queue_keeps_settings() {
        let dir = TempDir::new().unwrap();
        let provider = FilesystemProvider::new(config(&dir)).await.unwrap();
        provider.create_queue(&error_queue(), false).await.unwrap();

        let handle = provider.create_queue(&error_queue(), true).await.unwrap();
        assert!(!handle.is_transactional());
    }
}

// ============================================================================
// Durability Tests
// ============================================================================

mod durability {
    use super::*;

    /// Verify that messages and lookup id counters survive reopening the store.
    #[tokio::test]
    async fn test_messages_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let provider = provider_with_queues(&dir).await;
            provider
                .enqueue(&error_queue(), Message::new(Bytes::from("a")))
                .await
                .unwrap();
            provider
                .enqueue(&error_queue(), Message::new(Bytes::from("b")))
                .await
                .unwrap();
        }

        let reopened = FilesystemProvider::new(config(&dir)).await.unwrap();
        let handle = reopened.open_queue(&error_queue()).await.unwrap();
        let messages = handle.peek_all().await.unwrap();
        assert_eq!(messages.len(), 2);

        let next = reopened
            .enqueue(&error_queue(), Message::new(Bytes::from("c")))
            .await
            .unwrap();
        assert_eq!(next.lookup_id, LookupId::new(3));
    }

    /// Verify that lookup ids are not reused after messages are received.
    #[tokio::test]
    async fn test_lookup_ids_not_reused_after_receive() {
        let dir = TempDir::new().unwrap();
        let provider = provider_with_queues(&dir).await;
        let stored = provider
            .enqueue(&error_queue(), Message::new(Bytes::from("a")))
            .await
            .unwrap();
        let handle = provider.open_queue(&error_queue()).await.unwrap();

        let mut tx = Transaction::new();
        handle
            .receive_by_id(&stored.id, Duration::from_millis(50), &mut tx)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let after = provider
            .enqueue(&error_queue(), Message::new(Bytes::from("b")))
            .await
            .unwrap();
        assert_eq!(after.lookup_id, LookupId::new(2));
    }

    /// Verify that a journal left by a crash is applied on open.
    #[tokio::test]
    async fn test_interrupted_commit_is_replayed() {
        let dir = TempDir::new().unwrap();
        let stored = {
            let provider = provider_with_queues(&dir).await;
            provider
                .enqueue(&error_queue(), Message::new(Bytes::from("moving")))
                .await
                .unwrap()
        };

        // Simulate a crash after the commit point: staged delivery and journal on disk
        let source = FilesystemStore::queue_relative(&error_queue())
            .join(FilesystemStore::message_file_name(stored.lookup_id));
        let target = FilesystemStore::queue_relative(&orders_queue())
            .join(FilesystemStore::message_file_name(LookupId::new(1)));
        let staged = with_suffix(&target, TEMP_SUFFIX);

        let delivered = stored.assigned(MessageId::generate(1), LookupId::new(1));
        std::fs::write(
            dir.path().join(&staged),
            serde_json::to_vec(&delivered).unwrap(),
        )
        .unwrap();

        let record = JournalRecord {
            transaction: "crashed".to_string(),
            deliveries: vec![JournalDelivery {
                staged: staged.clone(),
                target: target.clone(),
            }],
            removals: vec![source.clone()],
        };
        std::fs::write(
            dir.path().join("journal").join("crashed.json"),
            serde_json::to_vec(&record).unwrap(),
        )
        .unwrap();

        let reopened = FilesystemProvider::new(config(&dir)).await.unwrap();

        let error = reopened.open_queue(&error_queue()).await.unwrap();
        let orders = reopened.open_queue(&orders_queue()).await.unwrap();
        assert!(error.peek_all().await.unwrap().is_empty());

        let moved = orders.peek_all().await.unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].body, Bytes::from("moving"));

        assert!(!dir.path().join("journal").join("crashed.json").exists());
        assert!(!dir.path().join(&staged).exists());
    }

    /// Verify that staged files without a journal are discarded on open.
    #[tokio::test]
    async fn test_uncommitted_files_are_removed() {
        let dir = TempDir::new().unwrap();
        provider_with_queues(&dir).await;

        let staged = dir
            .path()
            .join(FilesystemStore::queue_relative(&orders_queue()))
            .join("00000000000000000007.json.tmp");
        std::fs::write(&staged, b"{}").unwrap();
        let half_journal = dir.path().join("journal").join("partial.json.tmp");
        std::fs::write(&half_journal, b"{").unwrap();

        let reopened = FilesystemProvider::new(config(&dir)).await.unwrap();

        assert!(!staged.exists());
        assert!(!half_journal.exists());
        let orders = reopened.open_queue(&orders_queue()).await.unwrap();
        assert!(orders.peek_all().await.unwrap().is_empty());
    }
}

// ============================================================================
// Transaction Tests
// ============================================================================

mod transactions {
    use super::*;

    /// Verify that a received message stays hidden until rollback.
    #[tokio::test]
    async fn test_receive_locks_until_rollback() {
        let dir = TempDir::new().unwrap();
        let provider = provider_with_queues(&dir).await;
        let stored = provider
            .enqueue(&error_queue(), Message::new(Bytes::from("body")))
            .await
            .unwrap();
        let handle = provider.open_queue(&error_queue()).await.unwrap();

        let mut tx = Transaction::new();
        handle
            .receive_by_id(&stored.id, Duration::from_millis(50), &mut tx)
            .await
            .unwrap();
        assert!(handle.peek_all().await.unwrap().is_empty());

        let mut other = Transaction::new();
        let result = handle
            .receive_by_id(&stored.id, Duration::from_millis(20), &mut other)
            .await;
        assert!(matches!(result, Err(QueueError::Timeout { .. })));

        tx.rollback();
        assert_eq!(handle.peek_all().await.unwrap().len(), 1);
    }

    /// Verify that a send to a deleted queue fails the commit and keeps the source.
    #[tokio::test]
    async fn test_commit_to_missing_queue_keeps_source() {
        let dir = TempDir::new().unwrap();
        let provider = provider_with_queues(&dir).await;
        let stored = provider
            .enqueue(&error_queue(), Message::new(Bytes::from("body")))
            .await
            .unwrap();
        let error = provider.open_queue(&error_queue()).await.unwrap();
        let orders = provider.open_queue(&orders_queue()).await.unwrap();

        let mut tx = Transaction::new();
        let message = error
            .receive_by_id(&stored.id, Duration::from_millis(50), &mut tx)
            .await
            .unwrap();
        orders.send(&message, &mut tx).await.unwrap();

        std::fs::remove_dir_all(dir.path().join(FilesystemStore::queue_relative(&orders_queue())))
            .unwrap();

        let result = tx.commit().await;
        assert!(matches!(result, Err(QueueError::QueueNotFound { .. })));

        let remaining = error.peek_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, stored.id);
        assert_eq!(
            std::fs::read_dir(dir.path().join("journal")).unwrap().count(),
            0
        );
    }

    /// Verify that a journaled commit that cannot be applied keeps the source
    /// hidden and is finished by the next open.
    #[tokio::test]
    async fn test_unapplied_journal_holds_source_until_replay() {
        let dir = TempDir::new().unwrap();
        let stored = {
            let provider = provider_with_queues(&dir).await;
            let stored = provider
                .enqueue(&error_queue(), Message::new(Bytes::from("moving")))
                .await
                .unwrap();
            let error = provider.open_queue(&error_queue()).await.unwrap();
            let orders = provider.open_queue(&orders_queue()).await.unwrap();

            // A directory where the delivered file should land makes the rename fail
            let blocker = dir
                .path()
                .join(FilesystemStore::queue_relative(&orders_queue()))
                .join(FilesystemStore::message_file_name(LookupId::new(1)));
            std::fs::create_dir_all(blocker.join("blocker")).unwrap();

            let mut tx = Transaction::new();
            let message = error
                .receive_by_id(&stored.id, Duration::from_millis(50), &mut tx)
                .await
                .unwrap();
            orders.send(&message, &mut tx).await.unwrap();
            tx.commit().await.unwrap();

            assert!(error.peek_all().await.unwrap().is_empty());
            assert_eq!(
                std::fs::read_dir(dir.path().join("journal")).unwrap().count(),
                1
            );

            std::fs::remove_dir_all(&blocker).unwrap();
            stored
        };

        let reopened = FilesystemProvider::new(config(&dir)).await.unwrap();
        let error = reopened.open_queue(&error_queue()).await.unwrap();
        let orders = reopened.open_queue(&orders_queue()).await.unwrap();

        assert!(error.peek_all().await.unwrap().is_empty());
        let moved = orders.peek_all().await.unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].body, stored.body);
        assert_eq!(
            std::fs::read_dir(dir.path().join("journal")).unwrap().count(),
            0
        );
    }

    /// Verify that a non-transactional queue refuses transactional receives.
    #[tokio::test]
    async fn test_non_transactional_queue_refuses_receive() {
        let dir = TempDir::new().unwrap();
        let provider = FilesystemProvider::new(config(&dir)).await.unwrap();
        let handle = provider
            .create_queue(&QueuePath::new("plain"), false)
            .await
            .unwrap();

        let mut tx = Transaction::new();
        let result = handle
            .receive_by_lookup_id(LookupAction::First, LookupId::new(0), &mut tx)
            .await;
        assert!(matches!(result, Err(QueueError::NotTransactional { .. })));
    }
}
