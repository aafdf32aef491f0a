//! Tests for requeue error types.

use super::*;
use std::time::Duration;

#[test]
fn test_queue_error_converts() {
    let error: RequeueError = QueueError::Timeout {
        duration: Duration::from_secs(5),
    }
    .into();

    assert!(matches!(error, RequeueError::Queue(ref e) if e.is_timeout()));
    assert!(!error.is_configuration());
}

#[test]
fn test_configuration_error_keeps_message() {
    let error: RequeueError = ConfigurationError::Missing {
        key: "input_queue".to_string(),
    }
    .into();

    assert!(error.is_configuration());
    assert_eq!(
        error.to_string(),
        "Configuration error: Missing required configuration: input_queue"
    );
}

#[test]
fn test_address_error_is_configuration() {
    let error: RequeueError = ValidationError::Required {
        field: "queue_address".to_string(),
    }
    .into();

    assert!(error.is_configuration());
}
