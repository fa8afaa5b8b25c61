//! Raw TOML configuration data types
//!
//! These structs represent the exact structure of the TOML config file.
//! They are deserialized directly and converted into runtime settings with
//! the `to_*` methods.

mod daemon;
mod message_bus;
mod providers;

pub use daemon::{FileDaemonConfig, FileGatewayConfig};
pub use message_bus::FileMessageBusConfig;
pub use providers::{FileModelConfig, FileProviderConfig, FileRouterConfig};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use toolbridge_application::RetryPolicy;

/// Configuration validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigValidationError {
    #[error("daemon.port cannot be 0")]
    InvalidPort,

    #[error("{0} cannot be 0")]
    ZeroValue(&'static str),

    #[error("router.ema_alpha must be in (0, 1], got {0}")]
    InvalidEmaAlpha(f64),

    #[error("unknown routing strategy '{0}'")]
    UnknownStrategy(String),

    #[error("unknown message_bus.compression '{0}'")]
    UnknownCompression(String),

    #[error("provider '{0}' has no models")]
    NoModels(String),

    #[error("provider name '{0}' is used more than once")]
    DuplicateProvider(String),
}

/// Log destinations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    /// Directory for daily-rolling daemon logs. Unset logs to stderr only.
    pub dir: Option<String>,
    /// JSONL audit log of auth events. Unset disables auditing.
    pub audit_file: Option<String>,
}

impl FileLoggingConfig {
    pub fn dir_path(&self) -> Option<PathBuf> {
        self.dir.as_deref().filter(|d| !d.trim().is_empty()).map(PathBuf::from)
    }

    pub fn audit_path(&self) -> Option<PathBuf> {
        self.audit_file
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .map(PathBuf::from)
    }
}

/// Complete file configuration (raw TOML structure)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub daemon: FileDaemonConfig,
    pub gateway: FileGatewayConfig,
    pub message_bus: FileMessageBusConfig,
    pub router: FileRouterConfig,
    pub providers: Vec<FileProviderConfig>,
    pub logging: FileLoggingConfig,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            daemon: FileDaemonConfig::default(),
            gateway: FileGatewayConfig::default(),
            message_bus: FileMessageBusConfig::default(),
            router: FileRouterConfig::default(),
            providers: vec![FileProviderConfig::local_echo()],
            logging: FileLoggingConfig::default(),
        }
    }
}

impl FileConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.router.max_attempts.max(1),
            base_delay: Duration::from_millis(self.router.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.router.retry_max_delay_ms),
        }
    }

    /// Validate the entire configuration, stopping at the first problem.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.daemon.port == 0 {
            return Err(ConfigValidationError::InvalidPort);
        }

        let nonzero: [(&'static str, u64); 12] = [
            ("daemon.max_message_size", self.daemon.max_message_size as u64),
            ("daemon.ping_interval_secs", self.daemon.ping_interval_secs),
            ("daemon.ping_timeout_secs", self.daemon.ping_timeout_secs),
            ("daemon.handshake_timeout_secs", self.daemon.handshake_timeout_secs),
            ("daemon.health_interval_secs", self.daemon.health_interval_secs),
            ("gateway.connect_timeout_ms", self.gateway.connect_timeout_ms),
            ("gateway.open_timeout_ms", self.gateway.open_timeout_ms),
            ("gateway.handshake_timeout_ms", self.gateway.handshake_timeout_ms),
            ("gateway.call_timeout_secs", self.gateway.call_timeout_secs),
            ("message_bus.threshold_bytes", self.message_bus.threshold_bytes as u64),
            ("message_bus.failure_threshold", self.message_bus.failure_threshold as u64),
            ("router.failure_threshold", self.router.failure_threshold as u64),
        ];
        if let Some((field, _)) = nonzero.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigValidationError::ZeroValue(*field));
        }

        let alpha = self.router.ema_alpha;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ConfigValidationError::InvalidEmaAlpha(alpha));
        }

        self.router.to_params()?;
        self.message_bus.to_settings()?;

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.name.as_str()) {
                return Err(ConfigValidationError::DuplicateProvider(provider.name.clone()));
            }
            provider.to_profile()?;
        }
        Ok(())
    }
}
