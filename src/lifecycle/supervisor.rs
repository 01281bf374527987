//! Controller startup and supervision
//!
//! The controller's poll loop is synchronous and may block inside a producer
//! call, so it runs on a blocking thread. The supervisor raises the stop flag
//! on shutdown and then waits for the loop to finish, which is what closes
//! the link.

use std::future::Future;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::info;

use super::shutdown::StopFlag;
use crate::actuator::Actuator;
use crate::clock::Clock;
use crate::events::ControllerEvent;
use crate::link::{LinkError, SerialLink, Transport};
use crate::state::{ControllerSettings, ModeController, Producers};

/// Open the link, then build the producers and the controller.
///
/// Producers are only constructed once the link is up, so a missing device
/// never touches a collaborator.
pub fn launch<L, C, O, P>(
    open: O,
    build_producers: P,
    actuator: Box<dyn Actuator>,
    clock: C,
    settings: ControllerSettings,
    stop: StopFlag,
    event_tx: broadcast::Sender<ControllerEvent>,
) -> Result<ModeController<L, C>, LinkError>
where
    L: SerialLink,
    C: Clock,
    O: FnOnce() -> Result<Transport<L>, LinkError>,
    P: FnOnce() -> Producers,
{
    let transport = open()?;
    let producers = build_producers();
    let controller = ModeController::new(transport, producers, actuator, clock, settings, stop, event_tx);
    info!(mode = %controller.mode(), "controller ready");
    Ok(controller)
}

/// Run the controller until it exits on its own or `shutdown` resolves
pub async fn supervise<L, C, F>(controller: ModeController<L, C>, stop: StopFlag, shutdown: F) -> Result<()>
where
    L: SerialLink + 'static,
    C: Clock + 'static,
    F: Future<Output = ()>,
{
    let mut worker = tokio::task::spawn_blocking(move || controller.run());

    tokio::select! {
        joined = &mut worker => {
            return joined.context("controller thread panicked")?.map_err(Into::into);
        }
        _ = shutdown => {
            info!("shutdown requested, waiting for controller to release the link");
            stop.raise();
        }
    }

    worker
        .await
        .context("controller thread panicked")?
        .map_err(Into::into)
}
