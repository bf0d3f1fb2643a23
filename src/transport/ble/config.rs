//! Transport engine configuration.

use crate::transport::ble::chunk::DEFAULT_MAX_MESSAGE_SIZE;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for transport configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max message size must be greater than zero")]
    InvalidMaxMessageSize,
}

/// Configuration shared by both transport roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BleTransportConfig {
    /// Offer (reader) or prefer (holder) the L2CAP flow when available.
    pub use_l2cap: bool,
    /// Bound on a reassembled inbound message in bytes.
    pub max_message_size: usize,
}

impl Default for BleTransportConfig {
    fn default() -> Self {
        Self {
            use_l2cap: true,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl BleTransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_l2cap(mut self, enabled: bool) -> Self {
        self.use_l2cap = enabled;
        self
    }

    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_size == 0 {
            return Err(ConfigError::InvalidMaxMessageSize);
        }
        Ok(())
    }
}
