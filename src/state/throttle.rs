//! Directive throttle
//!
//! Pure gate deciding whether a freshly produced direction goes out on the
//! wire. A value change is sent right away; a repeat only once the mode's
//! minimum interval has passed since the last write.

use std::time::{Duration, Instant};

use crate::link::Direction;

/// Last emission plus the active mode's re-emission floor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleState {
    pub last_emitted: Option<Direction>,
    pub last_emitted_at: Option<Instant>,
    pub min_interval: Duration,
}

impl ThrottleState {
    /// Fresh state with nothing emitted yet
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_emitted: None,
            last_emitted_at: None,
            min_interval,
        }
    }
}

/// Decide whether `candidate` should be emitted at `now`.
///
/// Returns the updated state when emitting and the unchanged state otherwise.
/// Both `last_emitted` and `last_emitted_at` move together.
pub fn should_emit(state: ThrottleState, candidate: Direction, now: Instant) -> (bool, ThrottleState) {
    let emit = match (state.last_emitted, state.last_emitted_at) {
        (Some(last), Some(at)) => {
            candidate != last || now.saturating_duration_since(at) > state.min_interval
        }
        _ => true,
    };

    if emit {
        let next = ThrottleState {
            last_emitted: Some(candidate),
            last_emitted_at: Some(now),
            min_interval: state.min_interval,
        };
        (true, next)
    } else {
        (false, state)
    }
}
