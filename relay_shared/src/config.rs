//! Configuration system.
//!
//! Loads relay configuration from JSON strings/files. Every field has a
//! default, so `{}` is a valid config.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{entity::DEFAULT_NAME, net::DEFAULT_MAX_FRAME_LEN};

/// Root configuration shared by relay server and clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Server listen (or connect) address, e.g. `0.0.0.0:3000`.
    pub server_addr: String,
    /// Frames buffered per connection before it counts as too slow and is
    /// disconnected.
    pub outbound_queue_len: usize,
    /// Capacity of the channel feeding the hub.
    pub hub_queue_len: usize,
    /// Largest accepted frame payload, in bytes.
    pub max_frame_len: usize,
    /// Consecutive undecodable frames tolerated before a forced disconnect.
    /// `0` disables the limit.
    pub max_malformed_frames: u32,
    /// Player name (client only).
    pub player_name: String,
    /// Update rate (client only).
    pub tick_hz: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server_addr: "0.0.0.0:3000".to_string(),
            outbound_queue_len: 256,
            hub_queue_len: 1024,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_malformed_frames: 8,
            player_name: DEFAULT_NAME.to_string(),
            tick_hz: 30,
        }
    }
}

impl RelayConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Rejects settings the relay cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.outbound_queue_len == 0 {
            anyhow::bail!("outbound_queue_len must be at least 1");
        }
        if self.hub_queue_len == 0 {
            anyhow::bail!("hub_queue_len must be at least 1");
        }
        if self.max_frame_len == 0 {
            anyhow::bail!("max_frame_len must be at least 1");
        }
        Ok(())
    }

    /// Reads and parses a JSON config file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_is_default() {
        assert_eq!(RelayConfig::from_json_str("{}").unwrap(), RelayConfig::default());
    }

    #[test]
    fn partial_json_overrides_fields() {
        let cfg =
            RelayConfig::from_json_str(r#"{"server_addr":"127.0.0.1:4000","max_malformed_frames":0}"#)
                .unwrap();
        assert_eq!(cfg.server_addr, "127.0.0.1:4000");
        assert_eq!(cfg.max_malformed_frames, 0);
        assert_eq!(cfg.outbound_queue_len, 256);
    }

    #[test]
    fn zero_capacities_are_invalid() {
        assert!(RelayConfig::default().validate().is_ok());

        let cfg = RelayConfig::from_json_str(r#"{"outbound_queue_len":0}"#).unwrap();
        assert!(cfg.validate().is_err());
        let cfg = RelayConfig::from_json_str(r#"{"hub_queue_len":0}"#).unwrap();
        assert!(cfg.validate().is_err());
        let cfg = RelayConfig::from_json_str(r#"{"max_frame_len":0}"#).unwrap();
        assert!(cfg.validate().is_err());
    }
}
