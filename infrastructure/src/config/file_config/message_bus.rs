//! Message bus configuration from TOML (`[message_bus]` section)

use super::ConfigValidationError;
use crate::bus::MessageBusSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use toolbridge_domain::{CircuitBreakerConfig, CompressionKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileMessageBusConfig {
    pub enabled: bool,
    /// Storage directory. Unset keeps records in memory.
    pub dir: Option<String>,
    pub ttl_secs: u64,
    /// "none", "gzip" or "zlib".
    pub compression: String,
    /// Results strictly larger than this are offloaded.
    pub threshold_bytes: usize,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub io_timeout_secs: u64,
}

impl Default for FileMessageBusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: dirs::data_dir().map(|d| {
                d.join("toolbridge")
                    .join("message-bus")
                    .to_string_lossy()
                    .into_owned()
            }),
            ttl_secs: 3600,
            compression: "gzip".to_string(),
            threshold_bytes: 1024 * 1024,
            failure_threshold: 5,
            cooldown_secs: 60,
            io_timeout_secs: 10,
        }
    }
}

impl FileMessageBusConfig {
    pub fn dir_path(&self) -> Option<PathBuf> {
        self.dir
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
    }

    pub fn to_settings(&self) -> Result<MessageBusSettings, ConfigValidationError> {
        let compression: CompressionKind = self
            .compression
            .parse()
            .map_err(|_| ConfigValidationError::UnknownCompression(self.compression.clone()))?;
        Ok(MessageBusSettings {
            enabled: self.enabled,
            threshold_bytes: self.threshold_bytes,
            ttl: Duration::from_secs(self.ttl_secs),
            compression,
            breaker: CircuitBreakerConfig::new(
                self.failure_threshold,
                Duration::from_secs(self.cooldown_secs),
            ),
            io_timeout: Duration::from_secs(self.io_timeout_secs),
        })
    }
}
