//! Infrastructure layer for toolbridge
//!
//! This crate contains adapters that implement the ports defined
//! in the application layer: the NDJSON wire codec, the daemon and its
//! gateway client, the message bus, provider adapters, the builtin tool
//! catalog, configuration file loading and audit logging.

pub mod bus;
pub mod config;
pub mod daemon;
pub mod gateway;
pub mod logging;
pub mod providers;
pub mod tools;
pub mod wire;

// Re-export commonly used types
pub use bus::{FileBusStore, MemoryBusStore, MessageBusClient, MessageBusSettings};
pub use config::{ConfigLoader, ConfigValidationError, FileConfig};
pub use daemon::{Daemon, DaemonError, DaemonSettings, SessionManager, TokenManager};
pub use gateway::{GatewayClient, GatewayError, GatewaySettings, GatewayState};
pub use logging::JsonlAuditLogger;
pub use providers::{LocalEchoProvider, ProviderSetupError, build_provider, register_providers};
pub use tools::BuiltinToolCatalog;
pub use wire::{FrameReader, FrameWriter, ProtocolError};
