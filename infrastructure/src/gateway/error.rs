//! Error types for the gateway client

use thiserror::Error;
use toolbridge_application::BusError;
use toolbridge_domain::ErrorKind;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Everything a gateway caller can see. Raw transport errors are folded into
/// one of these before they leave the client.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Result not found: {0}")]
    Integrity(String),

    #[error("No capacity: {0}")]
    Capacity(String),

    #[error("Cannot reach daemon at {endpoint}: {last_error}\nHint: {hint}")]
    Connect {
        endpoint: String,
        last_error: String,
        hint: String,
    },

    #[error("Gateway client is closed")]
    Closed,
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Auth(_) => ErrorKind::Auth,
            GatewayError::Protocol(_) | GatewayError::Closed => ErrorKind::Protocol,
            GatewayError::Timeout(_) | GatewayError::Connect { .. } => ErrorKind::Timeout,
            GatewayError::Provider(_) => ErrorKind::Provider,
            GatewayError::Integrity(_) => ErrorKind::Integrity,
            GatewayError::Capacity(_) => ErrorKind::Capacity,
        }
    }

    /// Map a daemon-reported kind onto the client taxonomy.
    pub fn from_kind(kind: Option<ErrorKind>, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            Some(ErrorKind::Auth) => GatewayError::Auth(message),
            Some(ErrorKind::Timeout) => GatewayError::Timeout(message),
            Some(ErrorKind::Provider) => GatewayError::Provider(message),
            Some(ErrorKind::Integrity) => GatewayError::Integrity(message),
            Some(ErrorKind::Capacity) => GatewayError::Capacity(message),
            Some(ErrorKind::Protocol) | None => GatewayError::Protocol(message),
        }
    }
}

impl From<BusError> for GatewayError {
    fn from(e: BusError) -> Self {
        match e.kind() {
            ErrorKind::Timeout => GatewayError::Timeout(e.to_string()),
            ErrorKind::Integrity => GatewayError::Integrity(e.to_string()),
            _ => GatewayError::Capacity(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_error_carries_diagnostics() {
        let e = GatewayError::Connect {
            endpoint: "127.0.0.1:1".into(),
            last_error: "connection refused".into(),
            hint: "start the daemon".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("127.0.0.1:1"));
        assert!(msg.contains("connection refused"));
        assert!(msg.contains("start the daemon"));
        assert_eq!(e.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn corrupt_bus_record_surfaces_as_not_found() {
        let e: GatewayError = BusError::IntegrityFailure("tx".into()).into();
        assert!(matches!(e, GatewayError::Integrity(_)));
        assert!(e.to_string().contains("not found"));
    }

    #[test]
    fn daemon_kinds_map_one_to_one() {
        for kind in [
            ErrorKind::Auth,
            ErrorKind::Protocol,
            ErrorKind::Timeout,
            ErrorKind::Provider,
            ErrorKind::Integrity,
            ErrorKind::Capacity,
        ] {
            assert_eq!(GatewayError::from_kind(Some(kind), "x").kind(), kind);
        }
        assert_eq!(GatewayError::from_kind(None, "x").kind(), ErrorKind::Protocol);
    }
}
