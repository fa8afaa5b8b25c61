//! Message bus port
//!
//! The side channel that carries oversized tool results out of band.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use toolbridge_domain::{BusReference, CircuitSnapshot, ErrorKind};

/// Errors that can occur during message bus operations
#[derive(Error, Debug, Clone)]
pub enum BusError {
    #[error("Message bus disabled")]
    Disabled,

    #[error("Message bus circuit open")]
    CircuitOpen,

    #[error("Message bus record not found: {0}")]
    NotFound(String),

    /// Checksum mismatch. Reported to callers as "not found"; the payload is never returned.
    #[error("Message bus record not found: {0} (integrity check failed)")]
    IntegrityFailure(String),

    #[error("Unsupported compression: {0}")]
    UnsupportedCompression(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Message bus operation timed out")]
    Timeout,
}

impl BusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BusError::IntegrityFailure(_) | BusError::UnsupportedCompression(_) => {
                ErrorKind::Integrity
            }
            BusError::Timeout => ErrorKind::Timeout,
            BusError::NotFound(_) => ErrorKind::Integrity,
            BusError::Disabled
            | BusError::CircuitOpen
            | BusError::Storage(_)
            | BusError::Serialization(_) => ErrorKind::Capacity,
        }
    }
}

/// Counters and breaker view for status reporting.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BusStatus {
    pub enabled: bool,
    pub threshold_bytes: usize,
    pub stored: u64,
    pub retrieved: u64,
    pub integrity_failures: u64,
    pub circuit: CircuitSnapshot,
}

/// Out-of-band payload store with circuit breaking.
#[async_trait]
pub trait MessageBusPort: Send + Sync {
    /// `enabled && circuit not open && size > threshold`.
    fn should_use_bus(&self, size: usize) -> bool;

    async fn store(
        &self,
        transaction_id: &str,
        payload: &Value,
        metadata: Map<String, Value>,
    ) -> Result<BusReference, BusError>;

    /// Read back a payload. Never returns data whose checksum does not match.
    async fn retrieve(&self, transaction_id: &str) -> Result<Value, BusError>;

    async fn delete(&self, transaction_id: &str) -> Result<bool, BusError>;

    /// Remove expired records, returning how many were deleted.
    async fn cleanup_expired(&self) -> Result<usize, BusError>;

    fn status(&self) -> Option<BusStatus> {
        None
    }
}

/// Bus that never accepts payloads; every result stays inline.
pub struct DisabledMessageBus;

#[async_trait]
impl MessageBusPort for DisabledMessageBus {
    fn should_use_bus(&self, _size: usize) -> bool {
        false
    }

    async fn store(
        &self,
        _transaction_id: &str,
        _payload: &Value,
        _metadata: Map<String, Value>,
    ) -> Result<BusReference, BusError> {
        Err(BusError::Disabled)
    }

    async fn retrieve(&self, transaction_id: &str) -> Result<Value, BusError> {
        Err(BusError::NotFound(transaction_id.to_string()))
    }

    async fn delete(&self, _transaction_id: &str) -> Result<bool, BusError> {
        Ok(false)
    }

    async fn cleanup_expired(&self) -> Result<usize, BusError> {
        Ok(0)
    }
}
