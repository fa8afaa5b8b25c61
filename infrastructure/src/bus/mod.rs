//! Message bus side channel: out-of-band storage for oversized results.

pub mod client;
pub mod codec;
pub mod store;

pub use client::{MessageBusClient, MessageBusSettings};
pub use store::{BusStore, FileBusStore, MemoryBusStore};
