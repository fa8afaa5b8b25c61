//! Dispatch frames exchanged between the gateway client and the daemon.
//!
//! Every frame is one JSON object on its own line, discriminated by `op`.
//! Frames are parsed once at the transport boundary into these closed enums
//! so downstream code matches exhaustively instead of probing maps.

use crate::bus::BusReference;
use crate::core::error::ErrorKind;
use crate::tool::ToolDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Frames sent by the gateway client (C→S).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame on every connection.
    Hello {
        session_id: String,
        #[serde(default)]
        token: String,
    },
    ListTools,
    CallTool {
        request_id: String,
        name: String,
        #[serde(default)]
        arguments: Value,
    },
    /// Answer to a daemon [`ServerFrame::Ping`].
    Pong {
        #[serde(default)]
        nonce: u64,
    },
    RotateToken {
        old_token: String,
        new_token: String,
    },
}

/// Frames sent by the daemon (S→C).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServerFrame {
    HelloAck {
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ListToolsRes {
        tools: Vec<ToolDescriptor>,
    },
    CallToolAck {
        request_id: String,
        /// Deadline-extension hint in seconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<f64>,
    },
    /// Non-terminal; zero or more per request.
    Progress {
        request_id: String,
        note: String,
    },
    /// Terminal frame of a `call_tool`.
    CallToolRes(CallToolResult),
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<ErrorKind>,
    },
    Ping {
        nonce: u64,
    },
    /// Sent immediately before the daemon closes the connection.
    Close {
        code: u16,
        reason: String,
    },
    RotateTokenRes {
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Body of a `call_tool_res` frame.
///
/// Exactly one of `outputs`, `text`, `message_bus` carries the payload on
/// success. `error` is set on failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_bus: Option<BusReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl CallToolResult {
    pub fn outputs(request_id: impl Into<String>, outputs: Vec<Value>) -> Self {
        Self {
            request_id: request_id.into(),
            outputs: Some(outputs),
            ..Default::default()
        }
    }

    pub fn text(request_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn error(request_id: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            error: Some(message.into()),
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn offloaded(request_id: impl Into<String>, reference: BusReference) -> Self {
        Self {
            request_id: request_id.into(),
            message_bus: Some(reference),
            ..Default::default()
        }
    }

    pub fn with_route(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.model = Some(model.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Why a line could not be turned into a frame.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame has no 'op' field")]
    MissingOp,

    #[error("unknown op '{0}'")]
    UnknownOp(String),

    #[error("invalid '{op}' frame: {reason}")]
    InvalidFields { op: String, reason: String },
}

fn parse_tagged<T: serde::de::DeserializeOwned>(line: &str, known: &[&str]) -> Result<T, FrameError> {
    let value: Value =
        serde_json::from_str(line.trim()).map_err(|e| FrameError::Malformed(e.to_string()))?;
    let op = value
        .get("op")
        .and_then(|v| v.as_str())
        .ok_or(FrameError::MissingOp)?
        .to_string();
    if !known.contains(&op.as_str()) {
        return Err(FrameError::UnknownOp(op));
    }
    serde_json::from_value(value).map_err(|e| FrameError::InvalidFields {
        op,
        reason: e.to_string(),
    })
}

impl ClientFrame {
    pub const OPS: &'static [&'static str] =
        &["hello", "list_tools", "call_tool", "pong", "rotate_token"];

    pub fn parse(line: &str) -> Result<Self, FrameError> {
        parse_tagged(line, Self::OPS)
    }

    pub fn op(&self) -> &'static str {
        match self {
            ClientFrame::Hello { .. } => "hello",
            ClientFrame::ListTools => "list_tools",
            ClientFrame::CallTool { .. } => "call_tool",
            ClientFrame::Pong { .. } => "pong",
            ClientFrame::RotateToken { .. } => "rotate_token",
        }
    }
}

impl ServerFrame {
    pub const OPS: &'static [&'static str] = &[
        "hello_ack",
        "list_tools_res",
        "call_tool_ack",
        "progress",
        "call_tool_res",
        "error",
        "ping",
        "close",
        "rotate_token_res",
    ];

    pub fn parse(line: &str) -> Result<Self, FrameError> {
        parse_tagged(line, Self::OPS)
    }

    pub fn op(&self) -> &'static str {
        match self {
            ServerFrame::HelloAck { .. } => "hello_ack",
            ServerFrame::ListToolsRes { .. } => "list_tools_res",
            ServerFrame::CallToolAck { .. } => "call_tool_ack",
            ServerFrame::Progress { .. } => "progress",
            ServerFrame::CallToolRes(_) => "call_tool_res",
            ServerFrame::Error { .. } => "error",
            ServerFrame::Ping { .. } => "ping",
            ServerFrame::Close { .. } => "close",
            ServerFrame::RotateTokenRes { .. } => "rotate_token_res",
        }
    }

    /// The request this frame belongs to, if it is request-scoped.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ServerFrame::CallToolAck { request_id, .. }
            | ServerFrame::Progress { request_id, .. } => Some(request_id),
            ServerFrame::CallToolRes(res) => Some(&res.request_id),
            ServerFrame::Error { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }

    pub fn error(message: impl Into<String>, kind: ErrorKind) -> Self {
        ServerFrame::Error {
            request_id: None,
            message: message.into(),
            kind: Some(kind),
        }
    }

    pub fn request_error(
        request_id: impl Into<String>,
        message: impl Into<String>,
        kind: ErrorKind,
    ) -> Self {
        ServerFrame::Error {
            request_id: Some(request_id.into()),
            message: message.into(),
            kind: Some(kind),
        }
    }

    /// Encode as one newline-free JSON line.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_hello() {
        let frame = ClientFrame::parse(r#"{"op":"hello","session_id":"s1","token":"t"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Hello {
                session_id: "s1".into(),
                token: "t".into()
            }
        );
    }

    #[test]
    fn hello_without_token_defaults_to_empty() {
        let frame = ClientFrame::parse(r#"{"op":"hello","session_id":"s1"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Hello { token, .. } if token.is_empty()));
    }

    #[test]
    fn parse_list_tools_unit_variant() {
        let frame = ClientFrame::parse(r#"{"op":"list_tools"}"#).unwrap();
        assert_eq!(frame, ClientFrame::ListTools);
    }

    #[test]
    fn call_tool_defaults_arguments_to_null() {
        let frame =
            ClientFrame::parse(r#"{"op":"call_tool","request_id":"r1","name":"echo"}"#).unwrap();
        match frame {
            ClientFrame::CallTool { arguments, .. } => assert!(arguments.is_null()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_op_is_reported_by_name() {
        let err = ClientFrame::parse(r#"{"op":"teleport"}"#).unwrap_err();
        assert!(matches!(err, FrameError::UnknownOp(op) if op == "teleport"));
    }

    #[test]
    fn missing_op_and_malformed_are_distinct() {
        assert!(matches!(
            ClientFrame::parse(r#"{"session_id":"x"}"#),
            Err(FrameError::MissingOp)
        ));
        assert!(matches!(
            ClientFrame::parse("{not json"),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn known_op_with_bad_fields() {
        let err = ClientFrame::parse(r#"{"op":"call_tool","request_id":"r1"}"#).unwrap_err();
        assert!(matches!(err, FrameError::InvalidFields { op, .. } if op == "call_tool"));
    }

    #[test]
    fn hello_ack_omits_absent_fields() {
        let line = ServerFrame::HelloAck {
            ok: true,
            session_id: Some("s1".into()),
            error: None,
        }
        .to_line()
        .unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value, json!({"op": "hello_ack", "ok": true, "session_id": "s1"}));
    }

    #[test]
    fn call_tool_res_is_flattened_under_op() {
        let frame = ServerFrame::CallToolRes(CallToolResult::text("r7", "done"));
        let value: Value = serde_json::from_str(&frame.to_line().unwrap()).unwrap();
        assert_eq!(value["op"], "call_tool_res");
        assert_eq!(value["request_id"], "r7");
        assert_eq!(value["text"], "done");
        assert!(value.get("error").is_none());

        let back = ServerFrame::parse(&frame.to_line().unwrap()).unwrap();
        assert_eq!(back.request_id(), Some("r7"));
    }

    #[test]
    fn request_id_only_for_request_scoped_frames() {
        assert_eq!(ServerFrame::Ping { nonce: 1 }.request_id(), None);
        assert_eq!(
            ServerFrame::Progress {
                request_id: "a".into(),
                note: "working".into()
            }
            .request_id(),
            Some("a")
        );
        assert_eq!(
            ServerFrame::error("boom", ErrorKind::Protocol).request_id(),
            None
        );
    }

    #[test]
    fn ack_timeout_is_fractional_seconds() {
        let frame =
            ServerFrame::parse(r#"{"op":"call_tool_ack","request_id":"r1","timeout":1.5}"#).unwrap();
        assert_eq!(
            frame,
            ServerFrame::CallToolAck {
                request_id: "r1".into(),
                timeout: Some(1.5)
            }
        );
    }
}
