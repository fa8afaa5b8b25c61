//! NDJSON framing for the dispatch protocol.
//!
//! One JSON object per `\n`-terminated line. [`FrameReader`] owns the read
//! half and enforces the maximum frame size; [`FrameWriter`] serializes writes.

mod codec;

pub use codec::{FrameReader, FrameWriter, ProtocolError, WireFrame};
