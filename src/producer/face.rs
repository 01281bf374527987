//! Face adapter
//!
//! Pulls frames until interrupted or the source gives out, deriving a
//! direction from every frame with a detected face. The interrupt is checked
//! before each frame so an interrupt request is honoured within one frame
//! interval.

use tracing::{debug, info, warn};

use super::geometry::{derive_direction, FaceLandmarks, GeometryConfig};
use super::{DirectionProducer, ProduceContext};
use crate::link::Direction;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame source exhausted")]
    Exhausted,

    #[error("frame read failed: {0}")]
    ReadFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("landmark detection failed: {0}")]
    Failed(String),
}

/// Source of camera frames
pub trait FrameSource: Send {
    type Frame;

    fn next_frame(&mut self) -> Result<Self::Frame, FrameError>;

    fn is_exhausted(&self) -> bool;

    /// Let go of the camera between runs
    fn release(&mut self) {}
}

/// Finds the face landmarks in one frame, `None` if no face is visible
pub trait LandmarkDetector<F>: Send {
    fn detect(&mut self, frame: &F) -> Result<Option<FaceLandmarks>, DetectorError>;
}

pub struct FaceAdapter<S, D> {
    source: S,
    detector: D,
    geometry: GeometryConfig,
}

impl<S, D> FaceAdapter<S, D>
where
    S: FrameSource,
    D: LandmarkDetector<S::Frame>,
{
    pub fn new(source: S, detector: D, geometry: GeometryConfig) -> Self {
        Self {
            source,
            detector,
            geometry,
        }
    }

    fn track(&mut self, ctx: &mut dyn ProduceContext) -> Direction {
        let mut frames = 0u64;

        loop {
            if ctx.interrupted() {
                info!(frames, "face tracking interrupted");
                return Direction::Menu;
            }

            if self.source.is_exhausted() {
                info!(frames, "frame source exhausted");
                return Direction::Stop;
            }

            let frame = match self.source.next_frame() {
                Ok(frame) => frame,
                Err(FrameError::Exhausted) => {
                    info!(frames, "frame source exhausted");
                    return Direction::Stop;
                }
                Err(e) => {
                    warn!(?e, frames, "failed to read frame");
                    return Direction::Stop;
                }
            };
            frames += 1;

            match self.detector.detect(&frame) {
                Ok(Some(landmarks)) => {
                    let direction = derive_direction(&landmarks, &self.geometry);
                    debug!(%direction, "face direction");
                    ctx.report(direction);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(?e, frames, "face detector failed");
                    return Direction::Stop;
                }
            }
        }
    }
}

impl<S, D> DirectionProducer for FaceAdapter<S, D>
where
    S: FrameSource,
    D: LandmarkDetector<S::Frame>,
{
    fn name(&self) -> &'static str {
        "face"
    }

    fn produce(&mut self, ctx: &mut dyn ProduceContext) -> Direction {
        let outcome = self.track(ctx);
        self.source.release();
        outcome
    }
}
