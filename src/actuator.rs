//! Actuator sink for emitted directives

use tracing::{debug, info};

use crate::link::Direction;

/// Receives every directive that actually went out on the link
pub trait Actuator: Send {
    fn apply(&mut self, direction: Direction);
}

/// Logs the motor action a directive maps to; pin mapping is board specific
#[derive(Debug, Default)]
pub struct LoggingActuator;

impl Actuator for LoggingActuator {
    fn apply(&mut self, direction: Direction) {
        match direction {
            Direction::Forward | Direction::Backward | Direction::Left | Direction::Right | Direction::Stop => {
                info!(action = %direction.as_str().to_uppercase(), "motors");
            }
            Direction::Up | Direction::Down | Direction::Menu => {
                debug!(%direction, "no motor action");
            }
        }
    }
}
