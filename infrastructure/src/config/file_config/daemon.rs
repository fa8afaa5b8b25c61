//! Daemon and gateway configuration from TOML (`[daemon]`, `[gateway]` sections)

use crate::daemon::DaemonSettings;
use crate::gateway::GatewaySettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

fn default_health_file() -> String {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("toolbridge")
        .join("daemon-health.json")
        .to_string_lossy()
        .into_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileDaemonConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret for `hello`. Empty disables authentication.
    pub auth_token: String,
    pub max_message_size: usize,
    pub ping_interval_secs: u64,
    pub ping_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    /// Health signal file; empty string disables it.
    pub health_file: String,
    pub health_interval_secs: u64,
    /// Seconds between expired message-bus record sweeps.
    pub bus_cleanup_interval_secs: u64,
    /// Command the gateway may run once to start a missing daemon.
    pub spawn_command: Vec<String>,
}

impl Default for FileDaemonConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            auth_token: String::new(),
            max_message_size: 32 * 1024 * 1024,
            ping_interval_secs: 20,
            ping_timeout_secs: 20,
            handshake_timeout_secs: 5,
            health_file: default_health_file(),
            health_interval_secs: 5,
            bus_cleanup_interval_secs: 300,
            spawn_command: Vec::new(),
        }
    }
}

impl FileDaemonConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn health_path(&self) -> Option<PathBuf> {
        let path = self.health_file.trim();
        (!path.is_empty()).then(|| PathBuf::from(path))
    }

    pub fn to_settings(&self) -> DaemonSettings {
        DaemonSettings {
            max_message_size: self.max_message_size,
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            ping_timeout: Duration::from_secs(self.ping_timeout_secs),
            health_file: self.health_path(),
            health_interval: Duration::from_secs(self.health_interval_secs),
            bus_cleanup_interval: Duration::from_secs(self.bus_cleanup_interval_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileGatewayConfig {
    /// Overall connect budget, including retries and backoff.
    pub connect_timeout_ms: u64,
    /// Budget for one TCP open attempt.
    pub open_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub call_timeout_secs: u64,
    pub ack_grace_secs: u64,
    pub max_backoff_ms: u64,
    /// Run `daemon.spawn_command` once if the daemon is unreachable.
    pub autospawn: bool,
    pub health_max_age_secs: u64,
}

impl Default for FileGatewayConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            open_timeout_ms: 1_000,
            handshake_timeout_ms: 5_000,
            call_timeout_secs: 300,
            ack_grace_secs: 10,
            max_backoff_ms: 2_000,
            autospawn: false,
            health_max_age_secs: 30,
        }
    }
}

impl FileGatewayConfig {
    /// Gateway settings for reaching the daemon described by `daemon`.
    pub fn to_settings(&self, daemon: &FileDaemonConfig) -> GatewaySettings {
        let mut settings = GatewaySettings::new(daemon.endpoint(), daemon.auth_token.clone());
        settings.connect_timeout = Duration::from_millis(self.connect_timeout_ms);
        settings.open_timeout = Duration::from_millis(self.open_timeout_ms);
        settings.handshake_timeout = Duration::from_millis(self.handshake_timeout_ms);
        settings.call_timeout = Duration::from_secs(self.call_timeout_secs);
        settings.ack_grace = Duration::from_secs(self.ack_grace_secs);
        settings.max_backoff = Duration::from_millis(self.max_backoff_ms);
        settings.max_message_size = daemon.max_message_size;
        settings.health_file = daemon.health_path();
        settings.health_max_age = Duration::from_secs(self.health_max_age_secs);
        if self.autospawn && !daemon.spawn_command.is_empty() {
            settings = settings.with_spawn_command(daemon.spawn_command.clone());
        }
        settings
    }
}
