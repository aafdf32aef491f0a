//! Operator settings.

use requeue_runtime::{ConfigurationError, ProviderConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings of one requeue run
///
/// Every field has a default except `input_queue`, which [`validate`](Self::validate)
/// insists on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequeueSettings {
    /// Address of the error queue, `queue` or `queue@machine`
    pub input_queue: String,

    /// Skip the transactional check on the input queue
    ///
    /// A clustered queue cannot be probed reliably before failover.
    pub clustered: bool,

    /// How long a direct lookup waits before falling back to a header scan
    pub receive_timeout_seconds: u64,

    /// Machine name used for addresses without an `@machine` part
    pub local_machine: String,

    pub provider: ProviderConfig,
}

impl RequeueSettings {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.input_queue.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "input_queue".to_string(),
            });
        }

        if self.local_machine.trim().is_empty() {
            return Err(ConfigurationError::Invalid {
                message: "local_machine must not be empty".to_string(),
            });
        }

        if let ProviderConfig::Filesystem(fs) = &self.provider {
            if fs.root.as_os_str().is_empty() {
                return Err(ConfigurationError::Invalid {
                    message: "provider.root must not be empty".to_string(),
                });
            }
        }

        Ok(())
    }
}

impl Default for RequeueSettings {
    fn default() -> Self {
        Self {
            input_queue: String::new(),
            clustered: false,
            receive_timeout_seconds: 5,
            local_machine: "localhost".to_string(),
            provider: ProviderConfig::default(),
        }
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
