//! Domain error types and the failure taxonomy shared by every layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure classes a caller can observe, independent of which layer raised them.
///
/// Adapter-specific errors (`GatewayError`, `BusError`, ...) each map onto one
/// of these so that logs and client diagnostics speak a single vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad or missing token. Not retryable with the same credentials.
    Auth,
    /// Malformed or unexpected frame. Scoped to one connection.
    Protocol,
    /// Handshake, call or message-bus I/O exceeded its deadline.
    Timeout,
    /// Backend failure, already recorded against its circuit breaker.
    Provider,
    /// Checksum mismatch on a stored payload.
    Integrity,
    /// No provider capacity left.
    Capacity,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Provider => "provider",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Capacity => "capacity",
        }
    }

    /// Whether the gateway client may spend its single reconnect-and-retry on this kind.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::Protocol)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Domain-level errors
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("No providers registered")]
    NoProviders,

    #[error("No viable provider for request: {0}")]
    NoViableProvider(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Unsupported compression: {0}")]
    UnsupportedCompression(String),
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::NoProviders | DomainError::NoViableProvider(_) => ErrorKind::Capacity,
            DomainError::UnknownTool(_) | DomainError::InvalidArguments(_) => ErrorKind::Protocol,
            DomainError::UnsupportedCompression(_) => ErrorKind::Integrity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = DomainError::UnknownTool("frobnicate".to_string());
        assert_eq!(error.to_string(), "Unknown tool: frobnicate");
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(DomainError::NoProviders.kind(), ErrorKind::Capacity);
        assert_eq!(
            DomainError::UnsupportedCompression("lz9".into()).kind(),
            ErrorKind::Integrity
        );
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::Auth.is_retryable());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::Integrity).unwrap();
        assert_eq!(json, "\"integrity\"");
    }
}
