//! Configuration file loading for toolbridge
//!
//! This module handles file I/O and merging of configuration from multiple sources.
//! The priority order (highest to lowest):
//!
//! 1. Environment: `TOOLBRIDGE_<SECTION>__<KEY>` (e.g. `TOOLBRIDGE_DAEMON__PORT`)
//! 2. `--config <path>` specified file
//! 3. Project root: `./toolbridge.toml` or `./.toolbridge.toml`
//! 4. Global: `$XDG_CONFIG_HOME/toolbridge/config.toml` (or platform equivalent)
//! 5. Default values

mod file_config;
mod loader;

pub use file_config::{
    ConfigValidationError, FileConfig, FileDaemonConfig, FileGatewayConfig, FileLoggingConfig,
    FileMessageBusConfig, FileModelConfig, FileProviderConfig, FileRouterConfig,
};
pub use loader::ConfigLoader;
