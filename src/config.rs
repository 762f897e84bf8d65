//! Configuration loading and persistence.
//!
//! Reads `config.json` from the config directory, then applies `IOTAUDIT_*`
//! environment overrides. The token is never written to disk; it comes from
//! a [`crate::credentials::CredentialProvider`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::constants;
use crate::transport::Backoff;

/// Name of the configuration file inside [`Config::config_dir`].
pub const CONFIG_FILE: &str = "config.json";

/// Runtime configuration for the event socket, streams and toasts.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Dashboard server base URL (`http(s)://host[:port]`).
    pub server_url: String,
    /// Event socket path appended to `server_url`.
    pub events_path: String,
    /// Stream path template containing `{resource}`.
    pub stream_path: String,
    /// First reconnect delay in milliseconds.
    pub reconnect_base_ms: u64,
    /// Reconnect delay cap in milliseconds.
    pub reconnect_max_ms: u64,
    /// Automatic retries before giving up.
    pub reconnect_attempts: u32,
    /// Handshake timeout in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a connected socket counts as lost, in milliseconds.
    pub stale_timeout_ms: u64,
    /// Toast display duration in milliseconds.
    pub notification_ms: u64,
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "default durations are far below u64::MAX milliseconds"
)]
impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: constants::DEFAULT_SERVER_URL.to_string(),
            events_path: constants::DEFAULT_EVENTS_PATH.to_string(),
            stream_path: constants::DEFAULT_STREAM_PATH.to_string(),
            reconnect_base_ms: constants::RECONNECT_BASE_DELAY.as_millis() as u64,
            reconnect_max_ms: constants::RECONNECT_MAX_DELAY.as_millis() as u64,
            reconnect_attempts: constants::RECONNECT_MAX_ATTEMPTS,
            handshake_timeout_ms: constants::HANDSHAKE_TIMEOUT.as_millis() as u64,
            heartbeat_interval_ms: constants::HEARTBEAT_INTERVAL.as_millis() as u64,
            stale_timeout_ms: constants::STALE_TIMEOUT.as_millis() as u64,
            notification_ms: constants::NOTIFICATION_DISPLAY_DURATION.as_millis() as u64,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `IOTAUDIT_CONFIG_DIR` wins; otherwise the platform config directory
    /// (macOS: ~/Library/Application Support/iotaudit).
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("IOTAUDIT_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("iotaudit")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads `config.json` from the config directory with environment
    /// overrides applied. A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join(CONFIG_FILE);
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Loads a specific file without environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Applies `IOTAUDIT_*` overrides using `lookup` for variable access.
    ///
    /// Unparseable numeric values are ignored with a warning.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("IOTAUDIT_SERVER_URL") {
            self.server_url = url;
        }
        if let Some(path) = lookup("IOTAUDIT_EVENTS_PATH") {
            self.events_path = path;
        }
        if let Some(path) = lookup("IOTAUDIT_STREAM_PATH") {
            self.stream_path = path;
        }
        override_number(&lookup, "IOTAUDIT_RECONNECT_BASE_MS", &mut self.reconnect_base_ms);
        override_number(&lookup, "IOTAUDIT_RECONNECT_MAX_MS", &mut self.reconnect_max_ms);
        override_number(&lookup, "IOTAUDIT_RECONNECT_ATTEMPTS", &mut self.reconnect_attempts);
        override_number(&lookup, "IOTAUDIT_NOTIFICATION_MS", &mut self.notification_ms);
    }

    /// Persists the configuration to `config.json`.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Persists the configuration to `path`, owner read/write only.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        #[cfg(unix)]
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Reconnection schedule.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.reconnect_base_ms),
            Duration::from_millis(self.reconnect_max_ms),
            self.reconnect_attempts,
        )
    }

    /// Handshake timeout.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Inbound silence budget.
    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }

    /// Toast lifetime.
    pub fn notification_duration(&self) -> Duration {
        Duration::from_millis(self.notification_ms)
    }

    /// Full event socket URL.
    pub fn events_url(&self) -> String {
        crate::ws::events_url(&self.server_url, &self.events_path)
    }
}

fn override_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => log::warn!("[config] Ignoring {key}={raw:?}: not a number"),
        }
    }
}
