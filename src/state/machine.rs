//! Mode controller state machine
//!
//! A single cooperative poll loop. Each cycle ingests at most one inbound
//! command byte, then runs one unit of work of the active producer unless
//! more input is already waiting. Every directive goes through the throttle
//! before it is written; the controller is the only writer on the link.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::throttle::{should_emit, ThrottleState};
use crate::actuator::Actuator;
use crate::clock::Clock;
use crate::events::ControllerEvent;
use crate::lifecycle::StopFlag;
use crate::link::{Direction, InboundCommand, LinkError, SerialLink, Transport};
use crate::producer::{DirectionProducer, ProduceContext};

/// Operating modes of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// No producer active, only polling for commands
    #[default]
    Idle,
    /// Voice commands drive the directives
    Voice,
    /// Face orientation drives the directives
    Face,
    /// Terminal; the loop exits after the current cycle
    ShuttingDown,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Idle => write!(f, "Idle"),
            Mode::Voice => write!(f, "Voice"),
            Mode::Face => write!(f, "Face"),
            Mode::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

/// Timing and failure policy
#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    /// Throttle interval while in voice mode
    pub voice_interval: Duration,
    /// Throttle interval while in face mode
    pub face_interval: Duration,
    /// Sleep at the end of every cycle
    pub poll_interval: Duration,
    /// Consecutive link failures tolerated before giving up
    pub max_link_failures: u32,
}

impl ControllerSettings {
    fn interval_for(&self, mode: Mode) -> Duration {
        match mode {
            Mode::Voice => self.voice_interval,
            Mode::Face => self.face_interval,
            Mode::Idle | Mode::ShuttingDown => Duration::ZERO,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("serial link failed {consecutive} times in a row: {source}")]
    LinkFailed {
        consecutive: u32,
        #[source]
        source: LinkError,
    },
}

/// The two producers the controller arbitrates between
pub struct Producers {
    pub voice: Box<dyn DirectionProducer>,
    pub face: Box<dyn DirectionProducer>,
}

/// Which side of the half-duplex link an operation used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkPath {
    Inbound,
    Outbound,
}

/// Consecutive transport failure tracking, per side of the link
struct LinkHealth {
    inbound: u32,
    outbound: u32,
    limit: u32,
}

impl LinkHealth {
    fn new(limit: u32) -> Self {
        Self {
            inbound: 0,
            outbound: 0,
            limit: limit.max(1),
        }
    }

    fn counter(&mut self, path: LinkPath) -> &mut u32 {
        match path {
            LinkPath::Inbound => &mut self.inbound,
            LinkPath::Outbound => &mut self.outbound,
        }
    }

    fn ok(&mut self, path: LinkPath) {
        let counter = self.counter(path);
        if *counter > 0 {
            info!(?path, after = *counter, "serial link recovered");
        }
        *counter = 0;
    }

    fn fail(
        &mut self,
        path: LinkPath,
        source: LinkError,
        event_tx: &broadcast::Sender<ControllerEvent>,
    ) -> Result<(), ControllerError> {
        let limit = self.limit;
        let counter = self.counter(path);
        *counter += 1;
        let consecutive = *counter;

        warn!(?path, consecutive, limit, error = %source, "serial link I/O failed");
        let _ = event_tx.send(ControllerEvent::LinkFailure {
            consecutive,
            message: source.to_string(),
        });

        if consecutive >= limit {
            Err(ControllerError::LinkFailed { consecutive, source })
        } else {
            Ok(())
        }
    }
}

/// The state machine that owns the link and arbitrates producers
pub struct ModeController<L: SerialLink, C: Clock> {
    /// Current mode
    mode: Mode,
    /// Time when the current non-Idle mode was entered
    mode_entered_at: Option<Instant>,
    transport: Transport<L>,
    /// Throttle state of the current mode only
    throttle: ThrottleState,
    voice: Box<dyn DirectionProducer>,
    face: Box<dyn DirectionProducer>,
    actuator: Box<dyn Actuator>,
    clock: C,
    settings: ControllerSettings,
    health: LinkHealth,
    stop: StopFlag,
    event_tx: broadcast::Sender<ControllerEvent>,
}

impl<L: SerialLink, C: Clock> ModeController<L, C> {
    pub fn new(
        transport: Transport<L>,
        producers: Producers,
        actuator: Box<dyn Actuator>,
        clock: C,
        settings: ControllerSettings,
        stop: StopFlag,
        event_tx: broadcast::Sender<ControllerEvent>,
    ) -> Self {
        Self {
            mode: Mode::Idle,
            mode_entered_at: None,
            transport,
            throttle: ThrottleState::new(Duration::ZERO),
            voice: producers.voice,
            face: producers.face,
            actuator,
            clock,
            settings,
            health: LinkHealth::new(settings.max_link_failures),
            stop,
            event_tx,
        }
    }

    /// Get the current mode
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Run until a quit command, a stop request or persistent link failure.
    /// The link is closed on every exit path.
    pub fn run(mut self) -> Result<(), ControllerError> {
        info!("mode controller started in Idle mode");

        let result = loop {
            match self.step() {
                Ok(Mode::ShuttingDown) => break Ok(()),
                Ok(_) => {}
                Err(e) => {
                    error!(%e, "giving up on serial link");
                    break Err(e);
                }
            }
        };

        self.transport.close();
        info!("mode controller stopped");
        result
    }

    /// Run one poll cycle and return the mode it ended in
    pub fn step(&mut self) -> Result<Mode, ControllerError> {
        if self.mode == Mode::ShuttingDown {
            return Ok(self.mode);
        }

        if self.stop.is_raised() {
            info!("stop requested");
            self.transition_to(Mode::ShuttingDown);
            return Ok(self.mode);
        }

        let mut pending = self.inbound_pending()?;
        if pending {
            self.ingest_command()?;
            // a backlog is drained before any producer work
            pending = self.mode != Mode::ShuttingDown && self.inbound_pending()?;
        }
        if !pending {
            self.run_active_producer()?;
        }

        if self.mode != Mode::ShuttingDown {
            self.clock.sleep(self.settings.poll_interval);
        }

        Ok(self.mode)
    }

    /// Pending check; a failed check counts against the link and reads as empty
    fn inbound_pending(&mut self) -> Result<bool, ControllerError> {
        match self.transport.has_pending() {
            Ok(pending) => {
                self.health.ok(LinkPath::Inbound);
                Ok(pending)
            }
            Err(e) => {
                self.health.fail(LinkPath::Inbound, e, &self.event_tx)?;
                Ok(false)
            }
        }
    }

    /// Read and act on exactly one inbound byte
    fn ingest_command(&mut self) -> Result<(), ControllerError> {
        let command = match self.transport.read_command() {
            Ok(command) => {
                self.health.ok(LinkPath::Inbound);
                command
            }
            Err(LinkError::NoPendingByte) => {
                debug!("pending byte vanished before read");
                return Ok(());
            }
            Err(e) => return self.health.fail(LinkPath::Inbound, e, &self.event_tx),
        };

        debug!(%command, "received command");

        match command {
            InboundCommand::SwitchVoice => self.switch_mode(Mode::Voice, command),
            InboundCommand::SwitchFace => self.switch_mode(Mode::Face, command),
            InboundCommand::Quit => {
                info!("quit command received");
                self.transition_to(Mode::ShuttingDown);
                Ok(())
            }
            InboundCommand::Unknown(byte) => {
                if command.is_undecodable() {
                    warn!(byte, mode = %self.mode, "undecodable command byte ignored");
                } else {
                    info!(byte, mode = %self.mode, "unknown command ignored");
                }
                let _ = self.event_tx.send(ControllerEvent::CommandIgnored { byte });
                Ok(())
            }
        }
    }

    /// Enter a producer mode and acknowledge it on the link
    fn switch_mode(&mut self, mode: Mode, command: InboundCommand) -> Result<(), ControllerError> {
        self.transition_to(mode);

        if let Some(ack) = command.ack_byte() {
            match self.transport.write_line_raw(ack) {
                Ok(()) => self.health.ok(LinkPath::Outbound),
                Err(e) => self.health.fail(LinkPath::Outbound, e, &self.event_tx)?,
            }
        }
        Ok(())
    }

    /// Perform a mode transition; always starts a fresh throttle
    fn transition_to(&mut self, new_mode: Mode) {
        let old_mode = self.mode;
        let duration_ms = self
            .mode_entered_at
            .map(|t| self.clock.now().saturating_duration_since(t).as_millis() as u64)
            .unwrap_or(0);

        info!(
            from = %old_mode,
            to = %new_mode,
            duration_ms = duration_ms,
            "mode transition"
        );

        self.mode = new_mode;
        self.mode_entered_at = match new_mode {
            Mode::Voice | Mode::Face => Some(self.clock.now()),
            Mode::Idle | Mode::ShuttingDown => None,
        };
        self.throttle = ThrottleState::new(self.settings.interval_for(new_mode));

        let _ = self.event_tx.send(ControllerEvent::ModeChanged {
            from: old_mode,
            to: new_mode,
        });
    }

    /// Give the active producer one unit of work
    fn run_active_producer(&mut self) -> Result<(), ControllerError> {
        let mode = self.mode;
        let producer = match mode {
            Mode::Voice => &mut self.voice,
            Mode::Face => &mut self.face,
            Mode::Idle | Mode::ShuttingDown => return Ok(()),
        };

        debug!(producer = producer.name(), "running producer");

        let mut session = ProducerSession {
            mode,
            transport: &mut self.transport,
            throttle: &mut self.throttle,
            actuator: self.actuator.as_mut(),
            clock: &self.clock,
            health: &mut self.health,
            stop: &self.stop,
            event_tx: &self.event_tx,
            fatal: None,
        };

        let outcome = producer.produce(&mut session);
        if let Some(e) = session.fatal.take() {
            return Err(e);
        }

        debug!(mode = %mode, %outcome, "producer finished");
        let _ = self.event_tx.send(ControllerEvent::ProducerFinished { mode, outcome });
        Ok(())
    }
}

/// What a producer sees while it runs: the interrupt signal and a throttled
/// path to the link
struct ProducerSession<'a, L: SerialLink, C: Clock> {
    mode: Mode,
    transport: &'a mut Transport<L>,
    throttle: &'a mut ThrottleState,
    actuator: &'a mut dyn Actuator,
    clock: &'a C,
    health: &'a mut LinkHealth,
    stop: &'a StopFlag,
    event_tx: &'a broadcast::Sender<ControllerEvent>,
    /// Set once link failures cross the limit; later reports are dropped
    fatal: Option<ControllerError>,
}

impl<L: SerialLink, C: Clock> ProducerSession<'_, L, C> {
    fn record_failure(&mut self, path: LinkPath, e: LinkError) {
        if let Err(fatal) = self.health.fail(path, e, self.event_tx) {
            self.fatal = Some(fatal);
        }
    }
}

impl<L: SerialLink, C: Clock> ProduceContext for ProducerSession<'_, L, C> {
    fn interrupted(&mut self) -> bool {
        if self.fatal.is_some() || self.stop.is_raised() {
            return true;
        }
        match self.transport.has_pending() {
            Ok(pending) => {
                self.health.ok(LinkPath::Inbound);
                pending
            }
            Err(e) => {
                self.record_failure(LinkPath::Inbound, e);
                self.fatal.is_some()
            }
        }
    }

    fn report(&mut self, direction: Direction) {
        if self.fatal.is_some() {
            return;
        }

        let (emit, next) = should_emit(*self.throttle, direction, self.clock.now());
        if !emit {
            debug!(mode = %self.mode, %direction, "directive suppressed");
            let _ = self.event_tx.send(ControllerEvent::DirectiveSuppressed {
                mode: self.mode,
                direction,
            });
            return;
        }

        match self.transport.write_line(direction) {
            Ok(()) => {
                *self.throttle = next;
                self.health.ok(LinkPath::Outbound);
                info!(mode = %self.mode, %direction, "directive sent");
                self.actuator.apply(direction);
                let _ = self.event_tx.send(ControllerEvent::DirectiveSent {
                    mode: self.mode,
                    direction,
                });
            }
            Err(e) => self.record_failure(LinkPath::Outbound, e),
        }
    }
}
