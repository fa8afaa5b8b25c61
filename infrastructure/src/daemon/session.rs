//! Session registry.
//!
//! One [`SessionManager`] per daemon. Sessions are keyed by connection id
//! (client-chosen session ids are not trusted to be unique). Each session
//! tracks its pending `call_tool` requests with a cancellation token, so
//! purging a session cancels its in-flight work.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Duplicate request_id: {0}")]
    DuplicateRequest(String),

    #[error("Unknown connection: {0}")]
    UnknownConnection(u64),
}

struct SessionEntry {
    session_id: String,
    remote: SocketAddr,
    connected_at: DateTime<Utc>,
    pending: HashMap<String, CancellationToken>,
    cancel: CancellationToken,
}

/// Read-only view of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub connection_id: u64,
    pub session_id: String,
    pub remote: String,
    pub connected_at: DateTime<Utc>,
    pub pending_requests: usize,
}

#[derive(Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<u64, SessionEntry>>,
    next_connection_id: AtomicU64,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register a session after a successful handshake. Returns the token
    /// that is cancelled when the session is purged.
    pub fn register(
        &self,
        connection_id: u64,
        session_id: &str,
        remote: SocketAddr,
        parent: &CancellationToken,
    ) -> CancellationToken {
        let cancel = parent.child_token();
        self.lock().insert(
            connection_id,
            SessionEntry {
                session_id: session_id.to_string(),
                remote,
                connected_at: Utc::now(),
                pending: HashMap::new(),
                cancel: cancel.clone(),
            },
        );
        info!(
            "Session {} registered (connection {}, {})",
            session_id, connection_id, remote
        );
        cancel
    }

    /// Track a new pending request. A request_id already pending on this
    /// session is refused and the original left untouched.
    pub fn begin_request(
        &self,
        connection_id: u64,
        request_id: &str,
    ) -> Result<CancellationToken, SessionError> {
        let mut sessions = self.lock();
        let entry = sessions
            .get_mut(&connection_id)
            .ok_or(SessionError::UnknownConnection(connection_id))?;
        if entry.pending.contains_key(request_id) {
            return Err(SessionError::DuplicateRequest(request_id.to_string()));
        }
        let token = entry.cancel.child_token();
        entry.pending.insert(request_id.to_string(), token.clone());
        Ok(token)
    }

    pub fn finish_request(&self, connection_id: u64, request_id: &str) {
        if let Some(entry) = self.lock().get_mut(&connection_id) {
            entry.pending.remove(request_id);
        }
    }

    pub fn pending_requests(&self, connection_id: u64) -> Vec<String> {
        self.lock()
            .get(&connection_id)
            .map(|e| e.pending.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove a session, cancelling its pending requests. Returns how many were pending.
    pub fn purge(&self, connection_id: u64) -> Option<usize> {
        let entry = self.lock().remove(&connection_id)?;
        entry.cancel.cancel();
        let pending = entry.pending.len();
        if pending > 0 {
            info!(
                "Session {} purged with {} pending request(s)",
                entry.session_id, pending
            );
        } else {
            debug!("Session {} purged", entry.session_id);
        }
        Some(pending)
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut list: Vec<SessionSummary> = self
            .lock()
            .iter()
            .map(|(id, e)| SessionSummary {
                connection_id: *id,
                session_id: e.session_id.clone(),
                remote: e.remote.to_string(),
                connected_at: e.connected_at,
                pending_requests: e.pending.len(),
            })
            .collect();
        list.sort_by_key(|s| s.connection_id);
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9".parse().unwrap()
    }

    #[test]
    fn duplicate_request_ids_are_refused() {
        let sm = SessionManager::new();
        let conn = sm.next_connection_id();
        sm.register(conn, "s", addr(), &CancellationToken::new());

        let first = sm.begin_request(conn, "r1").unwrap();
        assert_eq!(
            sm.begin_request(conn, "r1").unwrap_err(),
            SessionError::DuplicateRequest("r1".into())
        );
        assert!(!first.is_cancelled());

        sm.finish_request(conn, "r1");
        assert!(sm.begin_request(conn, "r1").is_ok());
    }

    #[test]
    fn same_request_id_on_different_sessions_is_fine() {
        let sm = SessionManager::new();
        let (a, b) = (sm.next_connection_id(), sm.next_connection_id());
        let root = CancellationToken::new();
        sm.register(a, "same", addr(), &root);
        sm.register(b, "same", addr(), &root);
        assert!(sm.begin_request(a, "r").is_ok());
        assert!(sm.begin_request(b, "r").is_ok());
        assert_eq!(sm.count(), 2);
    }

    #[test]
    fn purge_cancels_pending_work() {
        let sm = SessionManager::new();
        let conn = sm.next_connection_id();
        sm.register(conn, "s", addr(), &CancellationToken::new());
        let r1 = sm.begin_request(conn, "r1").unwrap();
        let r2 = sm.begin_request(conn, "r2").unwrap();

        assert_eq!(sm.purge(conn), Some(2));
        assert!(r1.is_cancelled() && r2.is_cancelled());
        assert_eq!(sm.count(), 0);
        assert_eq!(sm.purge(conn), None);
        assert_eq!(
            sm.begin_request(conn, "r3").unwrap_err(),
            SessionError::UnknownConnection(conn)
        );
    }

    #[test]
    fn shutdown_token_reaches_requests() {
        let sm = SessionManager::new();
        let root = CancellationToken::new();
        let conn = sm.next_connection_id();
        sm.register(conn, "s", addr(), &root);
        let r = sm.begin_request(conn, "r").unwrap();
        root.cancel();
        assert!(r.is_cancelled());
    }
}
