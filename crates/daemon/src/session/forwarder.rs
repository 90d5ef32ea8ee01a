//! Output forwarding from a pty to its owning connection.
//!
//! Each session gets one OS thread that blocks on the pty reader. Reads are
//! decoded to text incrementally and delivered in order; when the stream ends
//! the thread terminates the session and reaps the shell.

use std::io::{self, Read};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::lifecycle::{LifecycleController, TerminationReason};
use super::pty::Session;

/// Incremental UTF-8 decoder.
///
/// Multi-byte sequences split across reads are held back until complete;
/// invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Creates a decoder with nothing buffered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `bytes`, keeping any trailing partial sequence for the next call.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::with_capacity(self.pending.len());
        let mut input: &[u8] = &self.pending;

        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    out.push_str(valid);
                    input = &[];
                    break;
                }
                Err(e) => {
                    let (valid, rest) = input.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[len..];
                        }
                        None => {
                            input = rest;
                            break;
                        }
                    }
                }
            }
        }

        let rest = input.to_vec();
        self.pending = rest;
        out
    }

    /// Flushes whatever is still buffered, replacing it with U+FFFD.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }

    /// Number of bytes held back.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Starts the output forwarder thread for `session`.
pub fn spawn(
    session: Arc<Session>,
    reader: Box<dyn Read + Send>,
    lifecycle: Arc<LifecycleController>,
    buffer_size: usize,
) -> io::Result<JoinHandle<()>> {
    let name = format!("pty-reader-{}", session.id());
    thread::Builder::new()
        .name(name)
        .spawn(move || forward(session, reader, lifecycle, buffer_size))
}

fn forward(
    session: Arc<Session>,
    mut reader: Box<dyn Read + Send>,
    lifecycle: Arc<LifecycleController>,
    buffer_size: usize,
) {
    let mut decoder = Utf8Decoder::new();
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut open = true;

    tracing::debug!(
        connection_id = %session.owner(),
        session_id = %session.id(),
        "Output forwarder started"
    );

    while open {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if !text.is_empty() {
                    open = lifecycle.emit_output(&session, text);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // Linux reports EIO once the slave side is closed.
                tracing::debug!(
                    session_id = %session.id(),
                    error = %e,
                    "PTY read ended"
                );
                break;
            }
        }
    }

    if open {
        let tail = decoder.finish();
        if !tail.is_empty() {
            lifecycle.emit_output(&session, tail);
        }
    }

    drop(reader);
    lifecycle.terminate_session(&session, TerminationReason::NaturalExit);

    let exit_code = session.reap();
    tracing::debug!(
        connection_id = %session.owner(),
        session_id = %session.id(),
        exit_code = ?exit_code,
        "Output forwarder finished"
    );
}
