//! Configuration.
//!
//! Loads network configuration from JSON strings (file IO left to the host).

use serde::{Deserialize, Serialize};

use crate::unit::DEFAULT_REORDER_WINDOW;

/// How often a replica repeats lookups for units still waiting on a snapshot.
pub const DEFAULT_LOOKUP_RETRY_MS: u64 = 1_000;

/// Root configuration shared by client and server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetConfig {
    /// Server UDP address, e.g. `127.0.0.1:40000`.
    pub server_addr: String,
    /// Replication ticks per second.
    pub tick_hz: u32,
    /// Silence after which a peer counts as gone.
    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,
    /// Keep-alive interval while nothing else is sent.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    /// How far ahead of a unit's step a delta may start before a snapshot is
    /// requested instead of waiting for the missing ranges.
    #[serde(default = "default_reorder_window")]
    pub reorder_window: u32,
    /// Interval between repeated snapshot lookups on a replica.
    #[serde(default = "default_lookup_retry_ms")]
    pub lookup_retry_ms: u64,
}

fn default_peer_timeout_ms() -> u64 {
    5_000
}

fn default_heartbeat_ms() -> u64 {
    1_000
}

fn default_reorder_window() -> u32 {
    DEFAULT_REORDER_WINDOW
}

fn default_lookup_retry_ms() -> u64 {
    DEFAULT_LOOKUP_RETRY_MS
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:40000".to_string(),
            tick_hz: 30,
            peer_timeout_ms: default_peer_timeout_ms(),
            heartbeat_ms: default_heartbeat_ms(),
            reorder_window: default_reorder_window(),
            lookup_retry_ms: default_lookup_retry_ms(),
        }
    }
}

impl NetConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Milliseconds per tick.
    pub fn tick_ms(&self) -> u64 {
        1_000 / u64::from(self.tick_hz.max(1))
    }
}
