//! # Requeue Runtime
//!
//! Transactional queue runtime used by the requeue tool to move messages out of
//! an error queue.
//!
//! This library provides:
//! - Queue addressing with direct format names
//! - Queue handles with receive-by-id, receive-by-lookup-id, send and peek
//! - Transactions that commit every staged receive and send or none of them
//! - The XML header codec for message extensions
//! - Filesystem and in-memory providers
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Messages, message ids and lookup ids
//! - [`address`] - Queue address parsing and format name resolution
//! - [`headers`] - Header maps and the extension codec
//! - [`transaction`] - Transaction scopes
//! - [`provider`] - Provider types and configuration
//! - [`client`] - Provider and queue handle traits
//! - [`providers`] - Concrete providers

// Module declarations
pub mod address;
pub mod client;
pub mod error;
pub mod headers;
pub mod message;
pub mod provider;
pub mod providers;
pub mod transaction;

// Re-export commonly used types at crate root for convenience
pub use address::{AddressResolver, DirectFormatResolver, QueueAddress, QueuePath};
pub use client::{QueueHandle, QueueProvider, QueueProviderFactory};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use headers::{HeaderCodec, HeaderMap, XmlHeaderCodec};
pub use message::{LookupAction, LookupId, Message, MessageId, Timestamp};
pub use provider::{FilesystemConfig, InMemoryConfig, ProviderConfig, ProviderType};
pub use providers::{FilesystemProvider, InMemoryProvider};
pub use transaction::{StagedOperation, Transaction, TransactionId, TransactionResource};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
