//! Protocol event definitions for termbridge.
//!
//! This module defines the events exchanged between the browser editor and the
//! terminal server. Every event travels as one JSON text frame of the form
//! `{"event": "<name>", "data": {...}}`.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Client-chosen terminal identifier, unique per connection.
pub type TerminalId = String;

/// Events sent by the browser client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Request a new terminal session.
    TerminalStart(TerminalStart),
    /// Raw keystrokes for a terminal.
    TerminalInput(TerminalInput),
    /// Request graceful termination of a terminal.
    TerminalKill(TerminalKill),
    /// Terminal window size changed.
    TerminalResize(TerminalResize),
}

impl ClientEvent {
    /// Returns the terminal this event addresses.
    pub fn terminal_id(&self) -> &TerminalId {
        match self {
            ClientEvent::TerminalStart(e) => &e.terminal_id,
            ClientEvent::TerminalInput(e) => &e.terminal_id,
            ClientEvent::TerminalKill(e) => &e.terminal_id,
            ClientEvent::TerminalResize(e) => &e.terminal_id,
        }
    }

    /// Decode a client event from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode the event as a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Text produced by the shell.
    TerminalOutput(TerminalOutput),
    /// The terminal has ended; the client must discard it.
    TerminalClose(TerminalClose),
    /// A request for this terminal was rejected.
    TerminalError(TerminalError),
}

impl ServerEvent {
    /// Build an output event.
    pub fn output(terminal_id: impl Into<TerminalId>, data: impl Into<String>) -> Self {
        ServerEvent::TerminalOutput(TerminalOutput {
            terminal_id: terminal_id.into(),
            data: data.into(),
        })
    }

    /// Build a close event.
    pub fn close(terminal_id: impl Into<TerminalId>) -> Self {
        ServerEvent::TerminalClose(TerminalClose {
            terminal_id: terminal_id.into(),
        })
    }

    /// Build an error event.
    pub fn error(
        terminal_id: impl Into<TerminalId>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        ServerEvent::TerminalError(TerminalError {
            terminal_id: terminal_id.into(),
            code,
            message: message.into(),
        })
    }

    /// Returns the terminal this event belongs to.
    pub fn terminal_id(&self) -> &TerminalId {
        match self {
            ServerEvent::TerminalOutput(e) => &e.terminal_id,
            ServerEvent::TerminalClose(e) => &e.terminal_id,
            ServerEvent::TerminalError(e) => &e.terminal_id,
        }
    }

    /// Returns true for the close event.
    pub fn is_close(&self) -> bool {
        matches!(self, ServerEvent::TerminalClose(_))
    }

    /// Decode a server event from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode the event as a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Client Events
// ============================================================================

/// Request to start a terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalStart {
    /// Terminal identifier chosen by the client.
    pub terminal_id: TerminalId,
    /// Working directory relative to the sandbox root.
    #[serde(default = "default_cwd")]
    pub cwd: String,
    /// Requested terminal columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cols: Option<u16>,
    /// Requested terminal rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u16>,
}

fn default_cwd() -> String {
    "/".to_string()
}

impl TerminalStart {
    /// Start request for `terminal_id` in `cwd` with the server's default size.
    pub fn new(terminal_id: impl Into<TerminalId>, cwd: impl Into<String>) -> Self {
        Self {
            terminal_id: terminal_id.into(),
            cwd: cwd.into(),
            cols: None,
            rows: None,
        }
    }
}

/// Keystrokes for a terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalInput {
    /// Target terminal.
    pub terminal_id: TerminalId,
    /// Raw input, written to the pty unmodified.
    pub data: String,
}

/// Request to kill a terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalKill {
    /// Target terminal.
    pub terminal_id: TerminalId,
}

/// Terminal resize notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalResize {
    /// Target terminal.
    pub terminal_id: TerminalId,
    /// New terminal columns.
    pub cols: u16,
    /// New terminal rows.
    pub rows: u16,
}

// ============================================================================
// Server Events
// ============================================================================

/// Output produced by a terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalOutput {
    /// Source terminal.
    pub terminal_id: TerminalId,
    /// Decoded output text.
    pub data: String,
}

/// Terminal closed notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalClose {
    /// Terminal that was closed.
    pub terminal_id: TerminalId,
}

/// Session-scoped error report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalError {
    /// Terminal the failed request addressed.
    pub terminal_id: TerminalId,
    /// Error code for programmatic handling.
    pub code: ErrorCode,
    /// Human-readable error message.
    pub message: String,
}

/// Error codes carried by [`TerminalError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The requested working directory is outside the sandbox or missing.
    InvalidWorkingDirectory,
    /// The pty or shell process could not be created.
    SpawnFailed,
    /// Too many terminals are open.
    SessionLimit,
    /// The request parameters were invalid.
    InvalidRequest,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_wire_format() {
        let event = ClientEvent::from_json(
            r#"{"event":"terminal_start","data":{"terminalId":"t1","cwd":"/project"}}"#,
        )
        .unwrap();

        assert_eq!(
            event,
            ClientEvent::TerminalStart(TerminalStart::new("t1", "/project"))
        );
        assert_eq!(event.terminal_id(), "t1");
    }

    #[test]
    fn test_start_defaults_cwd_to_root() {
        let event =
            ClientEvent::from_json(r#"{"event":"terminal_start","data":{"terminalId":"t2"}}"#)
                .unwrap();

        match event {
            ClientEvent::TerminalStart(start) => {
                assert_eq!(start.cwd, "/");
                assert_eq!(start.cols, None);
                assert_eq!(start.rows, None);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_start_with_size() {
        let event = ClientEvent::from_json(
            r#"{"event":"terminal_start","data":{"terminalId":"t3","cwd":"src","cols":132,"rows":43}}"#,
        )
        .unwrap();

        match event {
            ClientEvent::TerminalStart(start) => {
                assert_eq!(start.cols, Some(132));
                assert_eq!(start.rows, Some(43));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_input_keeps_control_characters() {
        let event = ClientEvent::from_json(
            r#"{"event":"terminal_input","data":{"terminalId":"t1","data":"\u0003ls -la\r"}}"#,
        )
        .unwrap();

        match event {
            ClientEvent::TerminalInput(input) => assert_eq!(input.data, "\u{3}ls -la\r"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_kill_and_resize_decode() {
        let kill =
            ClientEvent::from_json(r#"{"event":"terminal_kill","data":{"terminalId":"t9"}}"#)
                .unwrap();
        assert_eq!(
            kill,
            ClientEvent::TerminalKill(TerminalKill {
                terminal_id: "t9".to_string()
            })
        );

        let resize = ClientEvent::from_json(
            r#"{"event":"terminal_resize","data":{"terminalId":"t9","cols":100,"rows":30}}"#,
        )
        .unwrap();
        assert_eq!(resize.terminal_id(), "t9");
    }

    #[test]
    fn test_unknown_event_rejected() {
        let result = ClientEvent::from_json(r#"{"event":"fs_list","data":{"path":"/"}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_terminal_id_rejected() {
        let result = ClientEvent::from_json(r#"{"event":"terminal_kill","data":{}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_server_events_wire_format() {
        let output = ServerEvent::output("t1", "hi\r\n").to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(
            value,
            json!({"event": "terminal_output", "data": {"terminalId": "t1", "data": "hi\r\n"}})
        );

        let close = ServerEvent::close("t1").to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&close).unwrap();
        assert_eq!(
            value,
            json!({"event": "terminal_close", "data": {"terminalId": "t1"}})
        );
    }

    #[test]
    fn test_error_event_wire_format() {
        let event = ServerEvent::error(
            "t4",
            ErrorCode::InvalidWorkingDirectory,
            "Invalid working directory.",
        );
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "terminal_error");
        assert_eq!(value["data"]["code"], "invalid_working_directory");
        assert_eq!(value["data"]["terminalId"], "t4");
    }

    #[test]
    fn test_server_event_helpers() {
        assert!(ServerEvent::close("a").is_close());
        assert!(!ServerEvent::output("a", "x").is_close());
        assert_eq!(ServerEvent::output("abc", "").terminal_id(), "abc");
    }

    #[test]
    fn test_unicode_output() {
        let event = ServerEvent::output("t1", "héllo wörld 🚀");
        let decoded = ServerEvent::from_json(&event.to_json().unwrap()).unwrap();
        assert_eq!(decoded, event);
    }
}
