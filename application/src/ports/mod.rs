//! Port definitions (interfaces for external adapters)
//!
//! Ports define the contracts that infrastructure adapters must implement.

pub mod audit_logger;
pub mod message_bus;
pub mod provider_client;
pub mod tool_catalog;
