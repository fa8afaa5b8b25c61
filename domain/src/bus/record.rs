//! Message bus records: payloads stored out of band.

use crate::core::error::DomainError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

/// Compression applied to a stored payload.
///
/// Records persist the compression as a plain string so that a record written
/// by a newer daemon with an unknown algorithm is detected at read time
/// instead of failing to deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    #[default]
    None,
    Gzip,
    Zlib,
}

impl CompressionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionKind::None => "none",
            CompressionKind::Gzip => "gzip",
            CompressionKind::Zlib => "zlib",
        }
    }
}

impl std::fmt::Display for CompressionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CompressionKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "identity" => Ok(CompressionKind::None),
            "gzip" | "gz" => Ok(CompressionKind::Gzip),
            "zlib" | "deflate" => Ok(CompressionKind::Zlib),
            other => Err(DomainError::UnsupportedCompression(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Stored,
    Retrieved,
    Expired,
}

/// Metadata of one stored payload. The payload bytes live alongside it in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBusRecord {
    pub transaction_id: String,
    /// Hex SHA-256 of the uncompressed serialized payload.
    pub checksum: String,
    pub compression: String,
    /// Size of the uncompressed serialized payload in bytes.
    pub size: u64,
    /// Size of the bytes actually stored.
    pub stored_size: u64,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl MessageBusRecord {
    pub fn new(
        transaction_id: impl Into<String>,
        checksum: impl Into<String>,
        compression: CompressionKind,
        size: u64,
        stored_size: u64,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            checksum: checksum.into(),
            compression: compression.as_str().to_string(),
            size,
            stored_size,
            status: RecordStatus::Stored,
            created_at: now,
            expires_at: now + ttl,
            last_accessed: now,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Parse the stored compression name. Unknown names are a hard error.
    pub fn compression_kind(&self) -> Result<CompressionKind, DomainError> {
        self.compression.parse()
    }

    pub fn mark_accessed(&mut self, now: DateTime<Utc>) {
        self.last_accessed = now;
        self.status = RecordStatus::Retrieved;
    }

    pub fn reference(&self) -> BusReference {
        BusReference {
            transaction_id: self.transaction_id.clone(),
            size: self.size,
            checksum: self.checksum.clone(),
        }
    }
}

/// What a `call_tool_res` carries in place of an offloaded payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusReference {
    pub transaction_id: String,
    pub size: u64,
    pub checksum: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_parses_aliases() {
        assert_eq!("GZ".parse::<CompressionKind>().unwrap(), CompressionKind::Gzip);
        assert_eq!("deflate".parse::<CompressionKind>().unwrap(), CompressionKind::Zlib);
        assert_eq!("".parse::<CompressionKind>().unwrap(), CompressionKind::None);
    }

    #[test]
    fn unknown_compression_is_an_error() {
        let err = "lz4".parse::<CompressionKind>().unwrap_err();
        assert!(matches!(err, DomainError::UnsupportedCompression(name) if name == "lz4"));
    }

    #[test]
    fn record_expiry_is_inclusive() {
        let now = Utc::now();
        let record = MessageBusRecord::new(
            "tx",
            "abc",
            CompressionKind::Gzip,
            10,
            8,
            now,
            Duration::seconds(60),
        );
        assert!(!record.is_expired(now + Duration::seconds(59)));
        assert!(record.is_expired(now + Duration::seconds(60)));
        assert_eq!(record.compression, "gzip");
        assert_eq!(record.reference().size, 10);
    }

    #[test]
    fn mark_accessed_updates_status() {
        let now = Utc::now();
        let mut record =
            MessageBusRecord::new("tx", "abc", CompressionKind::None, 1, 1, now, Duration::seconds(5));
        let later = now + Duration::seconds(2);
        record.mark_accessed(later);
        assert_eq!(record.last_accessed, later);
        assert_eq!(record.status, RecordStatus::Retrieved);
    }
}
