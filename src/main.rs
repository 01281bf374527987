//! motion-arbiter: arbitrates voice and face motion intent for a motor controller
//!
//! The arbiter sits on a half-duplex serial link to a motor controller and:
//! - Switches between voice and face producers on single-byte commands
//! - Throttles and de-duplicates outbound direction directives
//! - Interrupts face tracking as soon as a new command arrives
//! - Closes the link exactly once on every exit path
//!
//! Classification and landmark detection run in external helper processes.

mod actuator;
mod bridge;
mod clock;
mod config;
mod events;
mod lifecycle;
mod link;
mod producer;
mod state;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::actuator::LoggingActuator;
use crate::clock::SystemClock;
use crate::config::Config;
use crate::events::ControllerEvent;
use crate::lifecycle::{ShutdownSignal, StopFlag};
use crate::link::Transport;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "motion-arbiter starting"
    );

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;
    info!(
        port = %config.serial_port,
        baud = config.baud_rate,
        "configuration loaded"
    );

    let stop = StopFlag::new();
    let (event_tx, mut event_rx) = broadcast::channel::<ControllerEvent>(64);

    // Open the link first; nothing else starts without it
    let link_config = config.link();
    let controller = match lifecycle::launch(
        || Transport::open(&link_config),
        || bridge::producers(&config),
        Box::new(LoggingActuator),
        SystemClock,
        config.controller(),
        stop.clone(),
        event_tx,
    ) {
        Ok(controller) => controller,
        Err(e) => {
            error!(%e, "LinkUnavailable");
            return Err(e).context("cannot start without the motor controller link");
        }
    };

    // Log controller events until the controller drops its sender
    let events = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => debug!(%event, "controller event"),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "controller event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let shutdown = ShutdownSignal::new();
    let signalled = async move {
        if let Err(e) = shutdown.wait().await {
            error!(?e, "failed to register signal handlers");
            std::future::pending::<()>().await;
        }
    };

    info!("arbiter initialized, listening for commands ('3' voice, '4' face, 'q' quit)");

    let result = lifecycle::supervise(controller, stop, signalled).await;

    if let Err(e) = events.await {
        warn!(?e, "event logger task failed");
    }

    match &result {
        Ok(()) => info!("motion-arbiter stopped"),
        Err(e) => error!(error = %format!("{:#}", e), "motion-arbiter stopped on fatal error"),
    }

    result
}
