//! State machine module for mode arbitration
//!
//! Provides the mode controller with four modes:
//! - Idle: default, only polling for commands
//! - Voice: voice adapter drives directives (2s repeat floor by default)
//! - Face: face adapter drives directives (0.5s repeat floor by default)
//! - ShuttingDown: terminal
//!
//! and the pure directive throttle that gates every write.

mod machine;
mod throttle;

pub use machine::{ControllerSettings, Mode, ModeController, Producers};
