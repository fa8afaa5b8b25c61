//! Port for structured audit logging.
//!
//! Security-relevant events (authentication disabled, token rejected, token
//! rotated) are recorded here in addition to `tracing`. Tracing carries
//! human-readable diagnostics; this port keeps a machine-readable trail.

use serde_json::Value;

/// A structured audit event.
pub struct AuditEvent {
    /// Event type identifier (e.g., "auth_rejected", "token_rotated").
    pub event_type: &'static str,
    /// JSON payload with event-specific data. Never contains token values.
    pub payload: Value,
}

impl AuditEvent {
    pub fn new(event_type: &'static str, payload: Value) -> Self {
        Self {
            event_type,
            payload,
        }
    }
}

/// Implementations write each event as a single record (e.g., one JSONL line).
/// `log` is synchronous and infallible; write failures are swallowed by the adapter.
pub trait AuditLogger: Send + Sync {
    fn log(&self, event: AuditEvent);
}

/// No-op implementation for tests and when auditing is disabled.
pub struct NoAuditLogger;

impl AuditLogger for NoAuditLogger {
    fn log(&self, _event: AuditEvent) {}
}
