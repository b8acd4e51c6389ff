use anyhow::Result;
use std::io;

use crate::command::Command;

/// Byte link to the robot controller.
///
/// Implementations are owned by a single `SerialSession`; nothing else may
/// touch the underlying connection.
pub trait CommandLink: Send {
    fn describe(&self) -> String;

    /// Write one framed command. A timeout surfaces as `ErrorKind::TimedOut`.
    fn write_line(&mut self, line: &[u8]) -> io::Result<()>;

    /// Read whatever the controller has already sent, without waiting.
    /// Returns `Ok(0)` when nothing is pending.
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Opens a `CommandLink`. Failure ends the transport worker only.
pub trait LinkOpener: Send {
    fn describe(&self) -> String;

    fn open(&self) -> Result<Box<dyn CommandLink>>;
}

/// Result of one send attempt that did not fail the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Sent(Command),
    TimedOut(Command),
}

/// Decode controller chatter permissively.
///
/// Invalid UTF-8 is dropped, trailing NULs and whitespace are stripped.
/// Returns `None` when nothing printable remains.
pub fn decode_echo(bytes: &[u8]) -> Option<String> {
    let text: String = String::from_utf8_lossy(bytes)
        .chars()
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .collect();
    let cleaned = text.trim_end_matches(|c: char| c == '\0' || c.is_whitespace());
    if cleaned.trim_start().is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}
