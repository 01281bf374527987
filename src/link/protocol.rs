//! Wire protocol definitions
//!
//! Inbound commands are single bytes with no terminator. Outbound directives
//! are the lowercase direction name followed by `\n`; mode acknowledgements
//! echo the command byte.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One instant of motion intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
    Up,
    Down,
    Stop,
    /// Sent back when face tracking is interrupted
    Menu,
}

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::Forward,
        Direction::Backward,
        Direction::Left,
        Direction::Right,
        Direction::Up,
        Direction::Down,
        Direction::Stop,
        Direction::Menu,
    ];

    /// Canonical lowercase name used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Stop => "stop",
            Direction::Menu => "menu",
        }
    }

    /// Line-terminated directive bytes
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = Vec::with_capacity(self.as_str().len() + 1);
        line.extend_from_slice(self.as_str().as_bytes());
        line.push(b'\n');
        line
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown direction label: {0:?}")]
pub struct UnknownDirection(pub String);

impl FromStr for Direction {
    type Err = UnknownDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim();
        Direction::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(label))
            .ok_or_else(|| UnknownDirection(label.to_string()))
    }
}

/// A decoded inbound byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundCommand {
    /// `'3'`
    SwitchVoice,
    /// `'4'`
    SwitchFace,
    /// `'q'` or `'Q'`
    Quit,
    /// Anything else, carrying the raw byte for diagnostics
    Unknown(u8),
}

impl InboundCommand {
    pub fn decode(byte: u8) -> Self {
        match byte {
            b'3' => InboundCommand::SwitchVoice,
            b'4' => InboundCommand::SwitchFace,
            b'q' | b'Q' => InboundCommand::Quit,
            other => InboundCommand::Unknown(other),
        }
    }

    /// Byte echoed back when the command switches mode
    pub fn ack_byte(&self) -> Option<u8> {
        match self {
            InboundCommand::SwitchVoice => Some(b'3'),
            InboundCommand::SwitchFace => Some(b'4'),
            _ => None,
        }
    }

    /// True when the raw byte was not even valid single-byte text
    pub fn is_undecodable(&self) -> bool {
        matches!(self, InboundCommand::Unknown(b) if !b.is_ascii())
    }
}

impl std::fmt::Display for InboundCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InboundCommand::SwitchVoice => write!(f, "SWITCH_VOICE"),
            InboundCommand::SwitchFace => write!(f, "SWITCH_FACE"),
            InboundCommand::Quit => write!(f, "QUIT"),
            InboundCommand::Unknown(b) => write!(f, "UNKNOWN(0x{:02x})", b),
        }
    }
}
