//! Session configuration (`~/.skiff/config.toml`).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Broker address, `host:port`.
    pub location: String,
    /// Identity volumes are created and looked up under.
    pub owner: String,
    /// How long `connect` waits for the first resource offer.
    pub ready_timeout_secs: u64,
    /// Minimum gap between keepalives.
    pub heartbeat_interval_secs: u64,
    /// Event-loop idle tick; heartbeats are considered on each one.
    pub idle_tick_ms: u64,
    /// Default wait for a container to become ready before tunnelling.
    pub container_ready_timeout_secs: u64,
    pub http_poll_interval_ms: u64,
    pub http_poll_attempts: u32,
    /// Per-attempt bound on a single HTTP probe.
    pub http_probe_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            location: "127.0.0.1:2020".to_string(),
            owner: "default".to_string(),
            ready_timeout_secs: 30,
            heartbeat_interval_secs: 60,
            idle_tick_ms: 1000,
            container_ready_timeout_secs: 30,
            http_poll_interval_ms: 500,
            http_poll_attempts: 60,
            http_probe_timeout_ms: 2000,
        }
    }
}

impl SessionConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn idle_tick(&self) -> Duration {
        Duration::from_millis(self.idle_tick_ms.max(1))
    }

    pub fn container_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.container_ready_timeout_secs)
    }

    pub fn http_poll_interval(&self) -> Duration {
        Duration::from_millis(self.http_poll_interval_ms)
    }

    pub fn http_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.http_probe_timeout_ms)
    }
}
