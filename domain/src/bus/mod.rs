//! Out-of-band payload storage records.

pub mod record;

pub use record::{BusReference, CompressionKind, MessageBusRecord, RecordStatus};
