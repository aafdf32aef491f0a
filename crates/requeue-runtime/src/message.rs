//! Message types for queue operations including core domain identifiers.

use crate::error::ValidationError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Queue-assigned identifier of a message
///
/// Unique within one queue instance, but a purged queue may hand out an id
/// that was used before. Use [`LookupId`] when the exact instance matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate an id in the `{guid}\{sequence}` layout used by the providers
    pub fn generate(sequence: u64) -> Self {
        Self(format!("{}\\{}", uuid::Uuid::new_v4(), sequence))
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Position of a message within one queue
///
/// Strictly increasing and never reused, even across purges.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LookupId(u64);

impl LookupId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for LookupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a lookup id is interpreted by `receive_by_lookup_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupAction {
    /// Exactly the message with the given lookup id
    Current,
    /// The first visible message after the given lookup id
    Next,
    /// The last visible message before the given lookup id
    Previous,
    /// The first visible message in the queue; the lookup id is ignored
    First,
    /// The last visible message in the queue; the lookup id is ignored
    Last,
}

impl LookupAction {
    /// Pick the matching lookup id out of the visible ids, which must be sorted
    pub fn select(&self, target: LookupId, visible: &[LookupId]) -> Option<LookupId> {
        match self {
            Self::Current => visible.iter().copied().find(|id| *id == target),
            Self::Next => visible.iter().copied().find(|id| *id > target),
            Self::Previous => visible.iter().rev().copied().find(|id| *id < target),
            Self::First => visible.first().copied(),
            Self::Last => visible.last().copied(),
        }
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message held by a queue
///
/// `id` and `lookup_id` are assigned by the queue that currently holds the
/// message. A message built with [`Message::new`] carries placeholder values
/// until a queue accepts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub lookup_id: LookupId,
    #[serde(with = "bytes_serde")]
    pub body: Bytes,
    /// Extension payload carrying the encoded header map
    #[serde(with = "bytes_serde")]
    pub extension: Bytes,
    pub label: Option<String>,
    pub correlation_id: Option<String>,
    pub enqueued_at: Timestamp,
}

/// Custom serialization for Bytes
mod bytes_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

impl Message {
    /// Create new message with body
    pub fn new(body: Bytes) -> Self {
        Self {
            id: MessageId(String::new()),
            lookup_id: LookupId(0),
            body,
            extension: Bytes::new(),
            label: None,
            correlation_id: None,
            enqueued_at: Timestamp::now(),
        }
    }

    /// Set the extension payload
    pub fn with_extension(mut self, extension: Bytes) -> Self {
        self.extension = extension;
        self
    }

    /// Add a human readable label
    pub fn with_label(mut self, label: String) -> Self {
        self.label = Some(label);
        self
    }

    /// Add correlation ID for tracking
    pub fn with_correlation_id(mut self, correlation_id: String) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Copy of this message as accepted by a queue under a new identity
    pub(crate) fn assigned(&self, id: MessageId, lookup_id: LookupId) -> Self {
        Self {
            id,
            lookup_id,
            enqueued_at: Timestamp::now(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
