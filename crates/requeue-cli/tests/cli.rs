//! End-to-end tests of the `requeue` binary.

use assert_cmd::Command;
use bytes::Bytes;
use predicates::prelude::*;
use requeue_runtime::{
    AddressResolver, DirectFormatResolver, FilesystemConfig, FilesystemProvider, HeaderCodec,
    HeaderMap, Message, QueueProvider, XmlHeaderCodec,
};
use tempfile::TempDir;

fn requeue(root: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("requeue").unwrap();
    cmd.env_remove("REQUEUE_CONFIG")
        .env_remove("RUST_LOG")
        .arg("--root")
        .arg(root.path());
    cmd
}

async fn provider(root: &TempDir) -> FilesystemProvider {
    FilesystemProvider::new(FilesystemConfig {
        root: root.path().to_path_buf(),
        poll_interval_ms: 5,
    })
    .await
    .unwrap()
}

/// Create `error` and `orders` queues and put one message on `error`
async fn seed(root: &TempDir, headers: &[(&str, &str)]) -> Message {
    let provider = provider(root).await;
    let resolver = DirectFormatResolver::default();
    let error = resolver.resolve("error").unwrap();
    provider.create_queue(&error, true).await.unwrap();
    provider
        .create_queue(&resolver.resolve("orders").unwrap(), true)
        .await
        .unwrap();

    let headers: HeaderMap = headers.iter().copied().collect();
    let mut message = Message::new(Bytes::from("payload"));
    XmlHeaderCodec::new()
        .save_headers(&headers, &mut message)
        .unwrap();
    provider.enqueue(&error, message).await.unwrap()
}

async fn queue_len(root: &TempDir, address: &str) -> usize {
    let path = DirectFormatResolver::default().resolve(address).unwrap();
    provider(root)
        .await
        .open_queue(&path)
        .await
        .unwrap()
        .peek_all()
        .await
        .unwrap()
        .len()
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("requeue")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("return-all"))
        .stdout(predicate::str::contains("--input-queue"));
}

#[test]
fn test_missing_input_queue_exits_with_configuration_code() {
    let root = TempDir::new().unwrap();

    requeue(&root)
        .arg("return-all")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("input_queue"));
}

#[tokio::test]
async fn test_return_by_id_prints_success() {
    let root = TempDir::new().unwrap();
    let stored = seed(&root, &[("FailedQ", "orders")]).await;

    requeue(&root)
        .args(["-i", "error", "return", stored.id.as_str()])
        .assert()
        .success()
        .stdout("Success.\n");

    assert_eq!(queue_len(&root, "error").await, 0);
    assert_eq!(queue_len(&root, "orders").await, 1);
}

#[tokio::test]
async fn test_unknown_id_falls_back_to_header_scan() {
    let root = TempDir::new().unwrap();
    seed(&root, &[("FailedQ", "orders"), ("MessageId", "other")]).await;

    requeue(&root)
        .args(["-i", "error", "--timeout", "0", "return", "missing-id"])
        .assert()
        .success()
        .stdout(
            "INFO: No message found with ID 'missing-id'. Checking headers of all messages.\n\
             INFO: No message found with ID 'missing-id' in any headers.\n",
        );

    assert_eq!(queue_len(&root, "error").await, 1);
}

#[tokio::test]
async fn test_original_id_match_is_returned() {
    let root = TempDir::new().unwrap();
    seed(&root, &[("FailedQ", "orders"), ("MessageId", "original-7")]).await;

    requeue(&root)
        .args(["-i", "error", "--timeout", "0", "return", "original-7"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Found message - going to return to queue.\nSuccess.\n",
        ));

    assert_eq!(queue_len(&root, "orders").await, 1);
}

#[tokio::test]
async fn test_missing_failed_queue_header_leaves_message() {
    let root = TempDir::new().unwrap();
    let stored = seed(&root, &[("MessageId", "abc")]).await;

    requeue(&root)
        .args(["-i", "error", "return", stored.id.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::starts_with(
            "ERROR: Message does not have a header indicating from which queue it came.",
        ));

    assert_eq!(queue_len(&root, "error").await, 1);
}

#[tokio::test]
async fn test_non_transactional_queue_is_rejected() {
    let root = TempDir::new().unwrap();
    let plain = DirectFormatResolver::default().resolve("plain").unwrap();
    provider(&root).await.create_queue(&plain, false).await.unwrap();

    requeue(&root)
        .args(["-i", "plain", "return-all"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("must be transactional"));
}

#[tokio::test]
async fn test_environment_supplies_input_queue() {
    let root = TempDir::new().unwrap();
    seed(&root, &[("FailedQ", "orders")]).await;

    requeue(&root)
        .env("REQUEUE__INPUT_QUEUE", "error")
        .arg("return-all")
        .assert()
        .success()
        .stdout("Success.\n");

    assert_eq!(queue_len(&root, "orders").await, 1);
}

#[tokio::test]
async fn test_config_file_supplies_input_queue() {
    let root = TempDir::new().unwrap();
    seed(&root, &[("FailedQ", "orders")]).await;
    let config = root.path().join("requeue.toml");
    std::fs::write(&config, "input_queue = \"error@localhost\"\n").unwrap();

    requeue(&root)
        .arg("--config")
        .arg(&config)
        .arg("return-all")
        .assert()
        .success();

    assert_eq!(queue_len(&root, "orders").await, 1);
}

#[test]
fn test_show_config_renders_toml() {
    let root = TempDir::new().unwrap();

    requeue(&root)
        .args(["-i", "error@app01", "--clustered", "show-config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("input_queue = \"error@app01\""))
        .stdout(predicate::str::contains("clustered = true"))
        .stdout(predicate::str::contains("kind = \"filesystem\""));
}
