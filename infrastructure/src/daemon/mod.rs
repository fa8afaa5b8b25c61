//! Dispatch daemon.
//!
//! Listens on TCP, authenticates each connection with a `hello` handshake,
//! then serves `list_tools`, `call_tool` and `rotate_token` over NDJSON
//! frames until the peer leaves or the daemon shuts down.

pub mod auth;
mod connection;
pub mod health;
pub mod server;
pub mod session;

pub use auth::{AuthError, TokenManager};
pub use health::{HealthRecord, HealthStatus, classify_health, read_health};
pub use server::{Daemon, DaemonError, DaemonSettings};
pub use session::{SessionError, SessionManager, SessionSummary};

#[cfg(test)]
mod e2e_tests;
