//! Session configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Options passed into a device session at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Negotiate raw multi-touch mode. When false the session only decodes
    /// pointer reports (relative motion and buttons).
    pub use_raw_mode: bool,
    /// HID++ device index used for commands.
    pub device_index: u8,
    /// Delay before the single automatic retry of a failed negotiation.
    pub retry_delay_ms: u64,
    /// Request/response timeout for transports that implement one.
    pub command_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            use_raw_mode: true,
            device_index: 0x01,
            retry_delay_ms: 500,
            command_timeout_ms: 1000,
        }
    }
}

impl SessionConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}
