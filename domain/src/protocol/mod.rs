//! Daemon wire protocol: newline-delimited JSON frames.

pub mod close;
pub mod frame;

pub use close::CloseCode;
pub use frame::{CallToolResult, ClientFrame, FrameError, ServerFrame};
