//! Provider types and configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Enumeration of supported queue providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    Filesystem,
    InMemory,
}

impl ProviderType {
    /// Check if messages survive a process restart
    pub fn is_durable(&self) -> bool {
        match self {
            Self::Filesystem => true,
            Self::InMemory => false,
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Filesystem => write!(f, "filesystem"),
            Self::InMemory => write!(f, "in-memory"),
        }
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    Filesystem(FilesystemConfig),
    InMemory(InMemoryConfig),
}

impl ProviderConfig {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            Self::Filesystem(_) => ProviderType::Filesystem,
            Self::InMemory(_) => ProviderType::InMemory,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::Filesystem(FilesystemConfig::default())
    }
}

/// Filesystem provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemConfig {
    /// Directory holding one subdirectory per queue
    pub root: PathBuf,
    /// Interval between attempts while a receive waits for its message
    pub poll_interval_ms: u64,
}

impl FilesystemConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./queues"),
            poll_interval_ms: 50,
        }
    }
}

/// In-memory provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryConfig {
    pub poll_interval_ms: u64,
}

impl InMemoryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
