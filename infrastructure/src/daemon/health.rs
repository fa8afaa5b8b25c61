//! Daemon health signal file.
//!
//! The daemon rewrites `{t, pid, sessions}` every few seconds. The gateway
//! client reads it before connecting so that a dead daemon is reported
//! immediately instead of after a full connect timeout.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    /// Unix time in seconds when the record was written.
    pub t: f64,
    pub pid: u32,
    pub sessions: usize,
}

impl HealthRecord {
    pub fn now(sessions: usize) -> Self {
        Self {
            t: unix_now(),
            pid: std::process::id(),
            sessions,
        }
    }

    pub fn age(&self) -> Duration {
        Duration::from_secs_f64((unix_now() - self.t).max(0.0))
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Fresh(HealthRecord),
    Stale { record: HealthRecord, age: Duration },
    Missing,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Fresh(_) => "fresh",
            HealthStatus::Stale { .. } => "stale",
            HealthStatus::Missing => "missing",
        }
    }
}

/// Write via temp file + rename so readers never see a partial record.
pub async fn write_health(path: &Path, record: &HealthRecord) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec(record)?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await
}

pub async fn read_health(path: &Path) -> Option<HealthRecord> {
    let bytes = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(r) => Some(r),
        Err(e) => {
            debug!("Unreadable health file {}: {}", path.display(), e);
            None
        }
    }
}

pub async fn classify_health(path: &Path, max_age: Duration) -> HealthStatus {
    match read_health(path).await {
        None => HealthStatus::Missing,
        Some(record) => {
            let age = record.age();
            if age <= max_age {
                HealthStatus::Fresh(record)
            } else {
                HealthStatus::Stale { record, age }
            }
        }
    }
}

pub async fn remove_health(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        debug!("Could not remove health file {}: {}", path.display(), e);
    }
}
