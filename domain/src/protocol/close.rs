//! Close codes carried by the `close` frame.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloseCode {
    /// Daemon is shutting down.
    GoingAway,
    /// First frame was not `hello`, or the handshake was malformed.
    ProtocolViolation,
    /// `hello.token` did not match the configured token.
    Unauthorized,
    /// A keepalive ping went unanswered.
    KeepaliveTimeout,
}

impl CloseCode {
    pub fn code(&self) -> u16 {
        match self {
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolViolation => 4400,
            CloseCode::Unauthorized => 4401,
            CloseCode::KeepaliveTimeout => 4408,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1001 => Some(CloseCode::GoingAway),
            4400 => Some(CloseCode::ProtocolViolation),
            4401 => Some(CloseCode::Unauthorized),
            4408 => Some(CloseCode::KeepaliveTimeout),
            _ => None,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            CloseCode::GoingAway => "daemon shutting down",
            CloseCode::ProtocolViolation => "protocol violation",
            CloseCode::Unauthorized => "unauthorized",
            CloseCode::KeepaliveTimeout => "keepalive timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for code in [
            CloseCode::GoingAway,
            CloseCode::ProtocolViolation,
            CloseCode::Unauthorized,
            CloseCode::KeepaliveTimeout,
        ] {
            assert_eq!(CloseCode::from_code(code.code()), Some(code));
        }
        assert_eq!(CloseCode::from_code(1000), None);
    }
}
