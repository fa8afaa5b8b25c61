//! Message bus client.
//!
//! Process-wide adapter behind [`MessageBusPort`]. Storing is guarded by a
//! [`SharedCircuitBreaker`]: once it opens, [`should_use_bus`] answers
//! `false` and results stay inline until a probe succeeds.
//!
//! [`should_use_bus`]: MessageBusPort::should_use_bus

use super::codec::{self, CodecError};
use super::store::BusStore;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use toolbridge_application::{BusError, BusStatus, MessageBusPort, SharedCircuitBreaker};
use toolbridge_domain::{BusReference, CircuitBreakerConfig, CompressionKind, MessageBusRecord};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MessageBusSettings {
    pub enabled: bool,
    /// Results strictly larger than this many bytes are offloaded.
    pub threshold_bytes: usize,
    pub ttl: Duration,
    pub compression: CompressionKind,
    pub breaker: CircuitBreakerConfig,
    /// Upper bound on any single store operation.
    pub io_timeout: Duration,
}

impl Default for MessageBusSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_bytes: 1024 * 1024,
            ttl: Duration::from_secs(3600),
            compression: CompressionKind::Gzip,
            breaker: CircuitBreakerConfig::default(),
            io_timeout: Duration::from_secs(10),
        }
    }
}

pub struct MessageBusClient {
    settings: MessageBusSettings,
    store: Arc<dyn BusStore>,
    breaker: SharedCircuitBreaker,
    stored: AtomicU64,
    retrieved: AtomicU64,
    integrity_failures: AtomicU64,
}

impl MessageBusClient {
    pub fn new(settings: MessageBusSettings, store: Arc<dyn BusStore>) -> Self {
        let breaker = SharedCircuitBreaker::new("message_bus", settings.breaker);
        Self {
            settings,
            store,
            breaker,
            stored: AtomicU64::new(0),
            retrieved: AtomicU64::new(0),
            integrity_failures: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &MessageBusSettings {
        &self.settings
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, BusError>>,
    ) -> Result<T, BusError> {
        match tokio::time::timeout(self.settings.io_timeout, fut).await {
            Ok(r) => r,
            Err(_) => Err(BusError::Timeout),
        }
    }

    fn ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.settings.ttl).unwrap_or(chrono::Duration::hours(1))
    }

    fn integrity_failure(&self, transaction_id: &str, detail: &str) -> BusError {
        self.integrity_failures.fetch_add(1, Ordering::Relaxed);
        warn!(
            "Message bus record {} failed integrity check: {}",
            transaction_id, detail
        );
        BusError::IntegrityFailure(transaction_id.to_string())
    }
}

#[async_trait]
impl MessageBusPort for MessageBusClient {
    fn should_use_bus(&self, size: usize) -> bool {
        self.settings.enabled
            && !self.breaker.is_open(Instant::now())
            && size > self.settings.threshold_bytes
    }

    async fn store(
        &self,
        transaction_id: &str,
        payload: &Value,
        metadata: Map<String, Value>,
    ) -> Result<BusReference, BusError> {
        if !self.settings.enabled {
            return Err(BusError::Disabled);
        }
        let serialized =
            serde_json::to_vec(payload).map_err(|e| BusError::Serialization(e.to_string()))?;

        if !self.breaker.try_acquire(Instant::now()) {
            return Err(BusError::CircuitOpen);
        }

        let compression = self.settings.compression;
        let encoded = match codec::encode(compression, serialized).await {
            Ok(e) => e,
            Err(e) => {
                self.breaker.record_failure(Instant::now());
                return Err(BusError::Storage(format!("compression failed: {}", e)));
            }
        };
        let packed = encoded.packed;

        let record = MessageBusRecord::new(
            transaction_id,
            encoded.checksum,
            compression,
            encoded.raw_len as u64,
            packed.len() as u64,
            chrono::Utc::now(),
            self.ttl(),
        )
        .with_metadata(metadata);

        match self.with_timeout(self.store.put(&record, &packed)).await {
            Ok(()) => {
                self.breaker.record_success();
                self.stored.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Message bus stored {} ({} bytes, {} stored as {})",
                    transaction_id,
                    encoded.raw_len,
                    packed.len(),
                    compression
                );
                Ok(record.reference())
            }
            Err(e) => {
                self.breaker.record_failure(Instant::now());
                warn!("Message bus store of {} failed: {}", transaction_id, e);
                Err(e)
            }
        }
    }

    async fn retrieve(&self, transaction_id: &str) -> Result<Value, BusError> {
        let entry = match self.with_timeout(self.store.get(transaction_id)).await {
            Ok(entry) => entry,
            Err(e) => {
                self.breaker.record_failure(Instant::now());
                return Err(e);
            }
        };
        let Some((mut record, bytes)) = entry else {
            return Err(BusError::NotFound(transaction_id.to_string()));
        };

        let now = chrono::Utc::now();
        if record.is_expired(now) {
            debug!("Message bus record {} expired, removing", transaction_id);
            let _ = self.store.delete(transaction_id).await;
            return Err(BusError::NotFound(transaction_id.to_string()));
        }

        let compression = record
            .compression_kind()
            .map_err(|_| BusError::UnsupportedCompression(record.compression.clone()))?;
        let (serialized, checksum) = match codec::decode(compression, bytes).await {
            Ok(decoded) => decoded,
            Err(CodecError::Io(e)) => return Err(self.integrity_failure(transaction_id, &e.to_string())),
            Err(e @ CodecError::Task(_)) => return Err(BusError::Storage(e.to_string())),
        };

        if checksum != record.checksum {
            return Err(self.integrity_failure(transaction_id, "checksum mismatch"));
        }
        let value: Value = serde_json::from_slice(&serialized)
            .map_err(|e| self.integrity_failure(transaction_id, &e.to_string()))?;

        record.mark_accessed(now);
        if let Err(e) = self.store.update_record(&record).await {
            debug!("Could not update access time of {}: {}", transaction_id, e);
        }
        self.retrieved.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    async fn delete(&self, transaction_id: &str) -> Result<bool, BusError> {
        self.with_timeout(self.store.delete(transaction_id)).await
    }

    async fn cleanup_expired(&self) -> Result<usize, BusError> {
        let now = chrono::Utc::now();
        let records = self.with_timeout(self.store.records()).await?;
        let mut removed = 0;
        for record in records.iter().filter(|r| r.is_expired(now)) {
            if self.store.delete(&record.transaction_id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Message bus cleanup removed {} expired record(s)", removed);
        }
        Ok(removed)
    }

    fn status(&self) -> Option<BusStatus> {
        Some(BusStatus {
            enabled: self.settings.enabled,
            threshold_bytes: self.settings.threshold_bytes,
            stored: self.stored.load(Ordering::Relaxed),
            retrieved: self.retrieved.load(Ordering::Relaxed),
            integrity_failures: self.integrity_failures.load(Ordering::Relaxed),
            circuit: self.breaker.snapshot(Instant::now()),
        })
    }
}
