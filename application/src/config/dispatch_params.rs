//! Dispatch parameters: call_tool loop control.
//!
//! [`DispatchParams`] groups the static parameters that control how
//! [`CallToolUseCase`](crate::use_cases::call_tool::CallToolUseCase)
//! acknowledges, reports progress on and delivers a tool call.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchParams {
    /// Timeout advertised in `call_tool_ack` when the tool has no hint.
    pub default_call_timeout: Duration,
    /// Interval between heartbeat `progress` frames while a provider call runs.
    pub progress_interval: Duration,
    /// Largest result that may travel inline in `call_tool_res`.
    pub max_inline_bytes: usize,
}

impl Default for DispatchParams {
    fn default() -> Self {
        Self {
            default_call_timeout: Duration::from_secs(300),
            progress_interval: Duration::from_secs(10),
            max_inline_bytes: 32 * 1024 * 1024,
        }
    }
}

impl DispatchParams {
    // ==================== Builder Methods ====================

    pub fn with_default_call_timeout(mut self, timeout: Duration) -> Self {
        self.default_call_timeout = timeout;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_max_inline_bytes(mut self, bytes: usize) -> Self {
        self.max_inline_bytes = bytes;
        self
    }
}
