//! Tests for operator settings.

use super::*;
use requeue_runtime::FilesystemConfig;
use std::path::PathBuf;

#[test]
fn test_defaults() {
    let settings = RequeueSettings::default();

    assert!(!settings.clustered);
    assert_eq!(settings.receive_timeout(), Duration::from_secs(5));
    assert_eq!(settings.local_machine, "localhost");
    assert_eq!(settings.provider, ProviderConfig::default());
}

#[test]
fn test_input_queue_is_required() {
    let settings = RequeueSettings::default();

    assert!(matches!(
        settings.validate(),
        Err(ConfigurationError::Missing { ref key }) if key == "input_queue"
    ));
}

#[test]
fn test_valid_settings() {
    let settings = RequeueSettings {
        input_queue: "error".to_string(),
        ..Default::default()
    };

    assert!(settings.validate().is_ok());
}

#[test]
fn test_empty_filesystem_root_is_invalid() {
    let settings = RequeueSettings {
        input_queue: "error".to_string(),
        provider: ProviderConfig::Filesystem(FilesystemConfig {
            root: PathBuf::new(),
            poll_interval_ms: 50,
        }),
        ..Default::default()
    };

    assert!(matches!(
        settings.validate(),
        Err(ConfigurationError::Invalid { .. })
    ));
}

#[test]
fn test_partial_document_uses_defaults() {
    let settings: RequeueSettings = serde_json::from_str(
        r#"{"input_queue":"error@app01","provider":{"kind":"filesystem","root":"/srv/queues"}}"#,
    )
    .unwrap();

    assert_eq!(settings.input_queue, "error@app01");
    assert_eq!(settings.receive_timeout_seconds, 5);
    assert_eq!(
        settings.provider,
        ProviderConfig::Filesystem(FilesystemConfig {
            root: PathBuf::from("/srv/queues"),
            poll_interval_ms: 50,
        })
    );
}
