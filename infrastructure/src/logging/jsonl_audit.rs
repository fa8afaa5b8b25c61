//! JSONL file writer for audit events.
//!
//! Each [`AuditEvent`] is serialized as a single JSON line with a
//! `type` field and `timestamp`, appended to the file via a buffered writer.
//! The file is opened in append mode so restarts keep the trail.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use toolbridge_application::{AuditEvent, AuditLogger};
use tracing::warn;

/// JSONL audit logger that writes one JSON object per line.
///
/// Thread-safe via `Mutex<BufWriter<File>>`. Flushes on `Drop`.
pub struct JsonlAuditLogger {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl JsonlAuditLogger {
    /// Open (or create) the audit log at `path`.
    ///
    /// Creates parent directories if needed.
    /// Returns `None` if the file cannot be opened.
    pub fn new(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            warn!(
                "Could not create audit log directory {}: {}",
                parent.display(),
                e
            );
            return None;
        }

        let file = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Could not open audit log file {}: {}", path.display(), e);
                return None;
            }
        };

        Some(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditLogger for JsonlAuditLogger {
    fn log(&self, event: AuditEvent) {
        let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

        let record = if let serde_json::Value::Object(mut map) = event.payload {
            map.insert(
                "type".to_string(),
                serde_json::Value::String(event.event_type.to_string()),
            );
            map.insert(
                "timestamp".to_string(),
                serde_json::Value::String(timestamp),
            );
            serde_json::Value::Object(map)
        } else {
            serde_json::json!({
                "type": event.event_type,
                "timestamp": timestamp,
                "data": event.payload,
            })
        };

        let Ok(line) = serde_json::to_string(&record) else {
            return;
        };

        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let _ = writeln!(writer, "{}", line);
        // Audit events are rare; flush each one
        let _ = writer.flush();
    }
}

impl Drop for JsonlAuditLogger {
    fn drop(&mut self) {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let _ = writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::TokenManager;
    use std::sync::Arc;

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn writes_type_and_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("events.jsonl");
        let logger = JsonlAuditLogger::new(&path).unwrap();

        logger.log(AuditEvent::new(
            "auth_rejected",
            serde_json::json!({"session_id": "conn-1"}),
        ));
        logger.log(AuditEvent::new("note", serde_json::json!("plain")));
        drop(logger);

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "auth_rejected");
        assert_eq!(lines[0]["session_id"], "conn-1");
        assert!(lines[0]["timestamp"].is_string());
        assert_eq!(lines[1]["data"], "plain");
    }

    #[test]
    fn appends_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let first = JsonlAuditLogger::new(&path).unwrap();
        first.log(AuditEvent::new("a", serde_json::json!({})));
        drop(first);
        let second = JsonlAuditLogger::new(&path).unwrap();
        second.log(AuditEvent::new("b", serde_json::json!({})));
        drop(second);

        let types: Vec<_> = read_lines(&path)
            .into_iter()
            .map(|v| v["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(types, vec!["a", "b"]);
    }

    #[test]
    fn token_rotation_never_logs_token_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let logger = Arc::new(JsonlAuditLogger::new(&path).unwrap());

        let tokens = TokenManager::with_audit("old-secret", logger.clone());
        tokens.rotate("old-secret", "new-secret", "conn-7").unwrap();
        drop(tokens);
        drop(logger);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("token_rotated"));
        assert!(!content.contains("old-secret"));
        assert!(!content.contains("new-secret"));
    }
}
