//! Gateway client side of the dispatch protocol.

pub mod client;
pub mod error;

pub use client::{GatewayClient, GatewaySettings, GatewayState};
pub use error::GatewayError;
