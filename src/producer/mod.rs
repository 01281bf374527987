//! Producer adapters
//!
//! Each adapter wraps one external, non-deterministic collaborator behind the
//! same [`DirectionProducer`] contract. Collaborator failures never escape an
//! adapter; they collapse to [`Direction::Stop`].
//!
//! Adapters never touch the serial link. They hand directions to the
//! controller through a [`ProduceContext`], which also carries the interrupt
//! signal.

mod face;
mod geometry;
mod voice;

pub use face::{DetectorError, FaceAdapter, FrameError, FrameSource, LandmarkDetector};
pub use geometry::{FaceLandmarks, GeometryConfig, NormalizedLandmarks};
pub use voice::{
    AudioSource, AudioWindow, CaptureError, Classification, ClassifierError, VoiceAdapter,
    VoiceClassifier, VoiceSettings, VOICE_LABELS,
};

use crate::link::Direction;

/// Controller-side hooks available to a running producer
pub trait ProduceContext {
    /// True once the producer should wind down
    fn interrupted(&mut self) -> bool;

    /// Offer a derived direction for emission
    fn report(&mut self, direction: Direction);
}

/// Uniform "produce direction labels" contract
pub trait DirectionProducer: Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Run one unit of work, reporting derived directions through `ctx`.
    ///
    /// Returns the direction the run ended on.
    fn produce(&mut self, ctx: &mut dyn ProduceContext) -> Direction;
}
