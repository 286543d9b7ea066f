//! Layered configuration: file -> environment -> CLI.
//!
//! `pulse.toml` holds the remote endpoints and sync tuning knobs. Environment
//! variables (`PULSE_BASE_URL`, `PULSE_WS_URL`) override the file; CLI flags
//! override both (applied by the command layer).
//!
//! ```toml
//! [remote]
//! base_url = "https://api.example.com"
//! ws_url = "wss://api.example.com"
//!
//! [sync]
//! slow_mutation_threshold_ms = 1000
//! heartbeat_interval_ms = 30000
//! max_reconnect_attempts = 5
//! poll_interval_ms = 2500
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Tuning knobs for the sync core. Every field has a production default; a
/// config file only needs to name the ones it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Successful mutations slower than this log a diagnostic (never abort).
    pub slow_mutation_threshold_ms: u64,
    /// Budget for a single websocket connect attempt.
    pub connect_timeout_ms: u64,
    /// Interval between keepalive pings while connected.
    pub heartbeat_interval_ms: u64,
    /// A ping unanswered for this long declares the connection dead.
    pub pong_timeout_ms: u64,
    /// First reconnect delay; doubles per attempt.
    pub backoff_base_ms: u64,
    /// Ceiling for the reconnect delay.
    pub backoff_cap_ms: u64,
    /// Consecutive failures before degrading to fallback polling.
    pub max_reconnect_attempts: u32,
    /// Refetch cadence while in fallback polling.
    pub poll_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            slow_mutation_threshold_ms: 1000,
            connect_timeout_ms: 5000,
            heartbeat_interval_ms: 30_000,
            pong_timeout_ms: 60_000,
            backoff_base_ms: 500,
            backoff_cap_ms: 15_000,
            max_reconnect_attempts: 5,
            poll_interval_ms: 2500,
        }
    }
}

impl SyncConfig {
    pub fn slow_mutation_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_mutation_threshold_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Remote API endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// REST base, e.g. `https://api.example.com`.
    pub base_url: String,
    /// WebSocket base, e.g. `wss://api.example.com`.
    pub ws_url: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            ws_url: "ws://localhost:8000".to_string(),
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
}

impl PulseConfig {
    /// Load from a TOML file, or defaults when `path` is `None` or missing,
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?
            }
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("PULSE_BASE_URL") {
            self.remote.base_url = url;
        }
        if let Ok(url) = std::env::var("PULSE_WS_URL") {
            self.remote.ws_url = url;
        }
    }
}
