//! Storage backends for message bus records.
//!
//! A record is two parts: its metadata ([`MessageBusRecord`]) and the stored
//! (possibly compressed) payload bytes. The file store keeps them as
//! `<id>.json` and `<id>.bin` side by side.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use toolbridge_application::BusError;
use toolbridge_domain::MessageBusRecord;
use tracing::debug;
use uuid::Uuid;

#[async_trait]
pub trait BusStore: Send + Sync {
    async fn put(&self, record: &MessageBusRecord, payload: &[u8]) -> Result<(), BusError>;

    async fn get(&self, transaction_id: &str)
    -> Result<Option<(MessageBusRecord, Vec<u8>)>, BusError>;

    /// Overwrite the metadata of an existing record.
    async fn update_record(&self, record: &MessageBusRecord) -> Result<(), BusError>;

    async fn delete(&self, transaction_id: &str) -> Result<bool, BusError>;

    async fn records(&self) -> Result<Vec<MessageBusRecord>, BusError>;
}

/// Transaction ids become file names; only a conservative character set is accepted.
fn validate_id(transaction_id: &str) -> Result<(), BusError> {
    let ok = !transaction_id.is_empty()
        && transaction_id.len() <= 128
        && transaction_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(BusError::Storage(format!(
            "invalid transaction id: {:?}",
            transaction_id
        )))
    }
}

fn storage(e: std::io::Error) -> BusError {
    BusError::Storage(e.to_string())
}

/// Directory-backed store.
pub struct FileBusStore {
    dir: PathBuf,
}

impl FileBusStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, BusError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(storage)?;
        debug!("Message bus store at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn payload_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.bin"))
    }

    /// Each call writes through its own temp file.
    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BusError> {
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, bytes).await.map_err(storage)?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(storage(e));
        }
        Ok(())
    }

    async fn write_record(&self, record: &MessageBusRecord) -> Result<(), BusError> {
        let json =
            serde_json::to_vec_pretty(record).map_err(|e| BusError::Serialization(e.to_string()))?;
        Self::write_atomic(&self.record_path(&record.transaction_id), &json).await
    }
}

#[async_trait]
impl BusStore for FileBusStore {
    async fn put(&self, record: &MessageBusRecord, payload: &[u8]) -> Result<(), BusError> {
        validate_id(&record.transaction_id)?;
        // Payload first: a record file never points at a missing payload.
        Self::write_atomic(&self.payload_path(&record.transaction_id), payload).await?;
        self.write_record(record).await
    }

    async fn get(
        &self,
        transaction_id: &str,
    ) -> Result<Option<(MessageBusRecord, Vec<u8>)>, BusError> {
        validate_id(transaction_id)?;
        let record_bytes = match tokio::fs::read(self.record_path(transaction_id)).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage(e)),
        };
        let record: MessageBusRecord = serde_json::from_slice(&record_bytes)
            .map_err(|e| BusError::Serialization(e.to_string()))?;
        let payload = match tokio::fs::read(self.payload_path(transaction_id)).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage(e)),
        };
        Ok(Some((record, payload)))
    }

    async fn update_record(&self, record: &MessageBusRecord) -> Result<(), BusError> {
        validate_id(&record.transaction_id)?;
        self.write_record(record).await
    }

    async fn delete(&self, transaction_id: &str) -> Result<bool, BusError> {
        validate_id(transaction_id)?;
        let mut removed = false;
        for path in [
            self.record_path(transaction_id),
            self.payload_path(transaction_id),
        ] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(storage(e)),
            }
        }
        Ok(removed)
    }

    async fn records(&self) -> Result<Vec<MessageBusRecord>, BusError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(storage)?;
        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(storage)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(bytes) = tokio::fs::read(&path).await else {
                continue;
            };
            match serde_json::from_slice::<MessageBusRecord>(&bytes) {
                Ok(r) => records.push(r),
                Err(e) => debug!("Skipping unreadable bus record {}: {}", path.display(), e),
            }
        }
        Ok(records)
    }
}

/// In-process store for tests and for daemons without a bus directory.
#[derive(Default)]
pub struct MemoryBusStore {
    entries: Mutex<HashMap<String, (MessageBusRecord, Vec<u8>)>>,
}

impl MemoryBusStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (MessageBusRecord, Vec<u8>)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mutate stored payload bytes in place.
    #[cfg(test)]
    pub(crate) fn tamper(&self, transaction_id: &str, f: impl FnOnce(&mut Vec<u8>)) -> bool {
        match self.lock().get_mut(transaction_id) {
            Some((_, bytes)) => {
                f(bytes);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl BusStore for MemoryBusStore {
    async fn put(&self, record: &MessageBusRecord, payload: &[u8]) -> Result<(), BusError> {
        validate_id(&record.transaction_id)?;
        self.lock().insert(
            record.transaction_id.clone(),
            (record.clone(), payload.to_vec()),
        );
        Ok(())
    }

    async fn get(
        &self,
        transaction_id: &str,
    ) -> Result<Option<(MessageBusRecord, Vec<u8>)>, BusError> {
        Ok(self.lock().get(transaction_id).cloned())
    }

    async fn update_record(&self, record: &MessageBusRecord) -> Result<(), BusError> {
        if let Some((existing, _)) = self.lock().get_mut(&record.transaction_id) {
            *existing = record.clone();
        }
        Ok(())
    }

    async fn delete(&self, transaction_id: &str) -> Result<bool, BusError> {
        Ok(self.lock().remove(transaction_id).is_some())
    }

    async fn records(&self) -> Result<Vec<MessageBusRecord>, BusError> {
        Ok(self.lock().values().map(|(r, _)| r.clone()).collect())
    }
}
