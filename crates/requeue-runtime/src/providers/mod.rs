//! Queue provider implementations.
//!
//! This module contains concrete implementations of the `QueueProvider` and
//! `QueueHandle` traits for the supported queue stores.

pub mod filesystem;
pub mod memory;

pub use filesystem::{FilesystemProvider, FilesystemQueueHandle};
pub use memory::{InMemoryProvider, InMemoryQueueHandle};
