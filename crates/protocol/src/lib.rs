//! # termbridge Protocol Library
//!
//! Event definitions for the real-time channel between the browser editor and
//! the termbridge terminal server.
//!
//! ## Overview
//!
//! Each WebSocket text frame carries exactly one JSON event:
//!
//! ```text
//! {"event": "terminal_start",  "data": {"terminalId": "t1", "cwd": "/project"}}
//! {"event": "terminal_output", "data": {"terminalId": "t1", "data": "hi\r\n"}}
//! ```
//!
//! | Direction | Event | Payload |
//! |---|---|---|
//! | client → server | `terminal_start` | `terminalId`, `cwd`, optional `cols`/`rows` |
//! | client → server | `terminal_input` | `terminalId`, `data` |
//! | client → server | `terminal_kill` | `terminalId` |
//! | client → server | `terminal_resize` | `terminalId`, `cols`, `rows` |
//! | server → client | `terminal_output` | `terminalId`, `data` |
//! | server → client | `terminal_close` | `terminalId` |
//! | server → client | `terminal_error` | `terminalId`, `code`, `message` |
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{ClientEvent, ServerEvent};
//!
//! let event = ClientEvent::from_json(
//!     r#"{"event":"terminal_input","data":{"terminalId":"t1","data":"ls\n"}}"#,
//! ).unwrap();
//! assert_eq!(event.terminal_id(), "t1");
//!
//! let reply = ServerEvent::close("t1").to_json().unwrap();
//! assert!(reply.contains("terminal_close"));
//! ```

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{
    ClientEvent, ErrorCode, ServerEvent, TerminalClose, TerminalError, TerminalId, TerminalInput,
    TerminalKill, TerminalOutput, TerminalResize, TerminalStart, PROTOCOL_VERSION,
};
