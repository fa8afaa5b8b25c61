//! Process-wide auth token.
//!
//! Validation and rotation take the same exclusive lock, so a rotation is
//! never observed half-applied. Rotation is forward-only: sessions that
//! already completed their handshake are not re-checked.

use serde_json::json;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use toolbridge_application::{AuditEvent, AuditLogger, NoAuditLogger};
use toolbridge_domain::ErrorKind;
use tracing::{info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("current token does not match")]
    RotationRejected,

    #[error("new token must not be empty")]
    EmptyToken,
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Auth
    }
}

/// Byte comparison whose running time does not depend on where the inputs differ.
fn tokens_match(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub struct TokenManager {
    token: Mutex<String>,
    audit: Arc<dyn AuditLogger>,
}

impl TokenManager {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_audit(token, Arc::new(NoAuditLogger))
    }

    pub fn with_audit(token: impl Into<String>, audit: Arc<dyn AuditLogger>) -> Self {
        let token = token.into();
        if token.is_empty() {
            warn!("Daemon auth token is empty: authentication is DISABLED, any client may connect");
            audit.log(AuditEvent::new("auth_disabled", json!({})));
        } else {
            info!("Daemon authentication enabled");
        }
        Self {
            token: Mutex::new(token),
            audit,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, String> {
        self.token.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn auth_disabled(&self) -> bool {
        self.lock().is_empty()
    }

    /// Check a `hello` token. An empty configured token accepts anything.
    pub fn validate(&self, presented: &str, session_id: &str) -> Result<(), AuthError> {
        let current = self.lock();
        if current.is_empty() || tokens_match(&current, presented) {
            return Ok(());
        }
        drop(current);
        warn!("Rejected hello from session {}: bad token", session_id);
        self.audit.log(AuditEvent::new(
            "auth_rejected",
            json!({ "session_id": session_id }),
        ));
        Err(AuthError::Unauthorized)
    }

    /// Replace the token. Succeeds only if `old` is the active token.
    pub fn rotate(&self, old: &str, new: &str, session_id: &str) -> Result<(), AuthError> {
        if new.is_empty() {
            self.audit.log(AuditEvent::new(
                "token_rotation_refused",
                json!({ "session_id": session_id, "reason": "empty" }),
            ));
            return Err(AuthError::EmptyToken);
        }

        let mut current = self.lock();
        if !tokens_match(&current, old) {
            drop(current);
            warn!("Token rotation from session {} refused: old token mismatch", session_id);
            self.audit.log(AuditEvent::new(
                "token_rotation_refused",
                json!({ "session_id": session_id, "reason": "mismatch" }),
            ));
            return Err(AuthError::RotationRejected);
        }
        *current = new.to_string();
        drop(current);

        info!("Auth token rotated by session {}", session_id);
        self.audit.log(AuditEvent::new(
            "token_rotated",
            json!({ "session_id": session_id }),
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Collects event types for assertions.
    #[derive(Default)]
    struct RecordingAudit {
        events: Mutex<Vec<&'static str>>,
    }

    impl AuditLogger for RecordingAudit {
        fn log(&self, event: AuditEvent) {
            self.events.lock().unwrap().push(event.event_type);
        }
    }

    #[test]
    fn matching_token_is_accepted_others_rejected() {
        let tm = TokenManager::new("secret");
        assert!(tm.validate("secret", "s").is_ok());
        for bad in ["", "secre", "secret!", "SECRET", "other"] {
            assert_eq!(tm.validate(bad, "s"), Err(AuthError::Unauthorized), "{bad}");
        }
        assert_eq!(AuthError::Unauthorized.to_string(), "unauthorized");
    }

    #[test]
    fn empty_token_disables_auth_and_is_audited() {
        let audit = Arc::new(RecordingAudit::default());
        let tm = TokenManager::with_audit("", audit.clone());
        assert!(tm.auth_disabled());
        assert!(tm.validate("anything", "s").is_ok());
        assert!(tm.validate("", "s").is_ok());
        assert_eq!(*audit.events.lock().unwrap(), vec!["auth_disabled"]);
    }

    #[test]
    fn rotation_requires_current_token() {
        let audit = Arc::new(RecordingAudit::default());
        let tm = TokenManager::with_audit("one", audit.clone());
        assert_eq!(tm.rotate("wrong", "two", "s"), Err(AuthError::RotationRejected));
        assert!(tm.validate("one", "s").is_ok());

        tm.rotate("one", "two", "s").unwrap();
        assert!(tm.validate("two", "s").is_ok());
        assert!(tm.validate("one", "s").is_err());
        assert_eq!(tm.rotate("two", "", "s"), Err(AuthError::EmptyToken));

        let events = audit.events.lock().unwrap().clone();
        assert!(events.contains(&"token_rotated"));
        assert!(events.contains(&"token_rotation_refused"));
    }

    #[test]
    fn concurrent_rotations_have_one_winner() {
        let tm = Arc::new(TokenManager::new("start"));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tm = Arc::clone(&tm);
                std::thread::spawn(move || tm.rotate("start", &format!("next-{i}"), "s").is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .filter_map(|h| h.join().ok())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
    }
}
