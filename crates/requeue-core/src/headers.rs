//! Header keys written by the bus and the bookkeeping applied on requeue.

use requeue_runtime::HeaderMap;

/// Address of the queue the message failed from
pub const FAILED_QUEUE: &str = "FailedQ";

/// Id the message had before it reached the error queue
pub const MESSAGE_ID: &str = "MessageId";

/// Alternate original id; takes priority over [`MESSAGE_ID`]
pub const ORIGINAL_ID: &str = "NServiceBus.OriginalId";

/// Number of times the message was returned through a direct lookup
pub const RETRY_COUNT: &str = "ReturnToSourceQueueCount";

/// Source queue address recorded on the message, if any
pub fn source_queue(headers: &HeaderMap) -> Option<&str> {
    headers.get(FAILED_QUEUE)
}

/// Id the fallback scan matches against
///
/// `NServiceBus.OriginalId` wins when present, even when empty. Empty ids
/// never match anything, so they come back as `None`.
pub fn original_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(ORIGINAL_ID)
        .or_else(|| headers.get(MESSAGE_ID))
        .filter(|id| !id.is_empty())
}

/// Bump the retry counter and return its new value
///
/// Absent starts at `1`. A value that is not a 32-bit integer, or would
/// overflow, is left as it is.
pub fn increment_retry_count(headers: &mut HeaderMap) -> String {
    let next = match headers.get(RETRY_COUNT) {
        None => "1".to_string(),
        Some(current) => match current.trim().parse::<i32>().ok().and_then(|n| n.checked_add(1)) {
            Some(n) => n.to_string(),
            None => return current.to_string(),
        },
    };

    headers.insert(RETRY_COUNT, next.clone());
    next
}

#[cfg(test)]
#[path = "headers_tests.rs"]
mod tests;
