//! Events module for controller activity
//!
//! Structured events broadcast by the mode controller for mode changes,
//! directive decisions and link trouble.

use serde::{Deserialize, Serialize};

use crate::link::Direction;
use crate::state::Mode;

/// Events emitted by the mode controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerEvent {
    /// Inbound command switched the active mode
    ModeChanged {
        from: Mode,
        to: Mode,
    },

    /// Directive written to the link
    DirectiveSent {
        mode: Mode,
        direction: Direction,
    },

    /// Directive held back by the throttle
    DirectiveSuppressed {
        mode: Mode,
        direction: Direction,
    },

    /// Inbound byte that is not a command
    CommandIgnored {
        byte: u8,
    },

    /// A producer call returned control to the loop
    ProducerFinished {
        mode: Mode,
        outcome: Direction,
    },

    /// Transport I/O failed
    LinkFailure {
        consecutive: u32,
        message: String,
    },
}

impl std::fmt::Display for ControllerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerEvent::ModeChanged { from, to } => write!(f, "MODE_CHANGED ({} -> {})", from, to),
            ControllerEvent::DirectiveSent { mode, direction } => {
                write!(f, "DIRECTIVE_SENT ({}: {})", mode, direction)
            }
            ControllerEvent::DirectiveSuppressed { mode, direction } => {
                write!(f, "DIRECTIVE_SUPPRESSED ({}: {})", mode, direction)
            }
            ControllerEvent::CommandIgnored { byte } => write!(f, "COMMAND_IGNORED (0x{:02x})", byte),
            ControllerEvent::ProducerFinished { mode, outcome } => {
                write!(f, "PRODUCER_FINISHED ({}: {})", mode, outcome)
            }
            ControllerEvent::LinkFailure { consecutive, message } => {
                write!(f, "LINK_FAILURE (#{}: {})", consecutive, message)
            }
        }
    }
}
