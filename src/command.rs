//! Steering commands and their wire encoding.
//!
//! The robot controller accepts one ASCII token per line, at 115200 baud:
//! `FORWARD`, `LEFT`, `RIGHT` or `STOP`, each followed by a single `\n`.

use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;

/// A discrete steering decision. Carries no payload beyond its tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    Forward,
    Left,
    Right,
    Stop,
}

impl Command {
    pub const ALL: [Command; 4] = [
        Command::Forward,
        Command::Left,
        Command::Right,
        Command::Stop,
    ];

    /// Uppercase wire token.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Forward => "FORWARD",
            Command::Left => "LEFT",
            Command::Right => "RIGHT",
            Command::Stop => "STOP",
        }
    }

    /// Token plus line terminator, ready to write to the link.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut line = Vec::with_capacity(self.as_str().len() + 1);
        line.extend_from_slice(self.as_str().as_bytes());
        line.push(b'\n');
        line
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FORWARD" => Ok(Command::Forward),
            "LEFT" => Ok(Command::Left),
            "RIGHT" => Ok(Command::Right),
            "STOP" => Ok(Command::Stop),
            other => Err(anyhow!(
                "unknown command '{}'; expected FORWARD, LEFT, RIGHT or STOP",
                other
            )),
        }
    }
}
