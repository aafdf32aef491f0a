//! Logical queue addresses and their resolution to provider connection paths.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

const PRIVATE_PREFIX: &str = "private$\\";

/// Logical queue address in `queue@machine` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueAddress {
    pub queue: String,
    pub machine: String,
}

impl QueueAddress {
    pub fn new(queue: impl Into<String>, machine: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            machine: machine.into(),
        }
    }
}

impl std::fmt::Display for QueueAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.queue, self.machine)
    }
}

/// Physical connection path of a queue, as understood by a provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueuePath(String);

impl QueuePath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueuePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Turns address strings (as stored in message headers) into connection paths
pub trait AddressResolver: Send + Sync {
    /// Parse an address string
    fn parse(&self, address: &str) -> Result<QueueAddress, ValidationError>;

    /// Resolve a parsed address to the path a provider opens
    fn to_full_path(&self, address: &QueueAddress) -> QueuePath;

    /// Parse and resolve in one step
    fn resolve(&self, address: &str) -> Result<QueuePath, ValidationError> {
        let parsed = self.parse(address)?;
        Ok(self.to_full_path(&parsed))
    }
}

/// Resolver producing direct format names
///
/// `orders@app01` resolves to `FormatName:DIRECT=OS:app01\private$\orders`,
/// `orders@10.0.0.5` to `FormatName:DIRECT=TCP:10.0.0.5\private$\orders`.
/// Addresses without a machine part belong to the local machine.
#[derive(Debug, Clone)]
pub struct DirectFormatResolver {
    local_machine: String,
}

impl DirectFormatResolver {
    pub fn new(local_machine: impl Into<String>) -> Self {
        Self {
            local_machine: local_machine.into(),
        }
    }

    pub fn local_machine(&self) -> &str {
        &self.local_machine
    }

    fn normalize_machine(&self, machine: &str) -> String {
        if machine == "." || machine.eq_ignore_ascii_case("localhost") {
            self.local_machine.clone()
        } else {
            machine.to_string()
        }
    }
}

impl Default for DirectFormatResolver {
    fn default() -> Self {
        Self::new("localhost")
    }
}

impl AddressResolver for DirectFormatResolver {
    fn parse(&self, address: &str) -> Result<QueueAddress, ValidationError> {
        if address.is_empty() {
            return Err(ValidationError::Required {
                field: "queue_address".to_string(),
            });
        }

        if address
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_address".to_string(),
                message: format!("'{}' contains whitespace or control characters", address),
            });
        }

        let mut parts = address.split('@');
        let queue = parts.next().unwrap_or_default();
        let machine = parts.next();

        if parts.next().is_some() {
            return Err(ValidationError::InvalidFormat {
                field: "queue_address".to_string(),
                message: format!("'{}' contains more than one '@'", address),
            });
        }

        if queue.is_empty() {
            return Err(ValidationError::InvalidFormat {
                field: "queue_address".to_string(),
                message: format!("'{}' has no queue name", address),
            });
        }

        let machine = match machine {
            None => self.local_machine.clone(),
            Some("") => {
                return Err(ValidationError::InvalidFormat {
                    field: "queue_address".to_string(),
                    message: format!("'{}' has an empty machine name", address),
                })
            }
            Some(machine) => self.normalize_machine(machine),
        };

        Ok(QueueAddress::new(queue, machine))
    }

    fn to_full_path(&self, address: &QueueAddress) -> QueuePath {
        let protocol = if address.machine.parse::<IpAddr>().is_ok() {
            "TCP"
        } else {
            "OS"
        };

        let queue = if address
            .queue
            .to_ascii_lowercase()
            .starts_with(PRIVATE_PREFIX)
        {
            address.queue.clone()
        } else {
            format!("{}{}", PRIVATE_PREFIX, address.queue)
        };

        QueuePath::new(format!(
            "FormatName:DIRECT={}:{}\\{}",
            protocol, address.machine, queue
        ))
    }
}

#[cfg(test)]
#[path = "address_tests.rs"]
mod tests;
