//! Voice adapter
//!
//! One call captures one fixed-length audio window, classifies it, and maps
//! the top class to a direction when its confidence clears the threshold.
//! The call blocks for roughly one window and cannot be interrupted.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::{DirectionProducer, ProduceContext};
use crate::link::Direction;

/// Class order of score vectors returned by voice classifiers
pub const VOICE_LABELS: [Direction; 5] = [
    Direction::Backward,
    Direction::Forward,
    Direction::Left,
    Direction::Right,
    Direction::Stop,
];

/// Mono PCM samples in `[-1.0, 1.0]`
#[derive(Debug, Clone, PartialEq)]
pub struct AudioWindow {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl AudioWindow {
    /// Zero-pad or truncate to exactly `len` samples
    pub fn fit_to(mut self, len: usize) -> Self {
        self.samples.resize(len, 0.0);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("audio capture I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audio capture failed: {0}")]
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("classifier returned a malformed reply: {0}")]
    Protocol(String),

    #[error("classifier failed: {0}")]
    Failed(String),
}

/// Records one audio window
pub trait AudioSource: Send {
    fn capture(&mut self, sample_rate: u32, window: Duration) -> Result<AudioWindow, CaptureError>;
}

/// Top class and its confidence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub label: Direction,
    pub confidence: f32,
}

impl Classification {
    /// Pick the arg-max of a score vector ordered as [`VOICE_LABELS`]
    pub fn from_scores(scores: &[f32]) -> Option<Self> {
        if scores.len() != VOICE_LABELS.len() {
            return None;
        }
        scores
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, s)| s.is_finite())
            .fold(None, |best: Option<(usize, f32)>, (i, s)| match best {
                Some((_, b)) if b >= s => best,
                _ => Some((i, s)),
            })
            .map(|(i, confidence)| Self {
                label: VOICE_LABELS[i],
                confidence,
            })
    }
}

/// Keyword classifier over one audio window
pub trait VoiceClassifier: Send {
    fn classify(&mut self, window: &AudioWindow) -> Result<Classification, ClassifierError>;
}

/// Per-adapter configuration
#[derive(Debug, Clone, Copy)]
pub struct VoiceSettings {
    /// Confidence must strictly exceed this
    pub threshold: f32,
    pub sample_rate: u32,
    pub window: Duration,
}

impl VoiceSettings {
    pub fn window_samples(&self) -> usize {
        (self.window.as_secs_f64() * self.sample_rate as f64).round() as usize
    }
}

pub struct VoiceAdapter<A, C> {
    source: A,
    classifier: C,
    settings: VoiceSettings,
}

impl<A: AudioSource, C: VoiceClassifier> VoiceAdapter<A, C> {
    pub fn new(source: A, classifier: C, settings: VoiceSettings) -> Self {
        Self {
            source,
            classifier,
            settings,
        }
    }

    /// Capture and classify one window. Every failure maps to `stop`.
    pub fn listen(&mut self) -> Direction {
        debug!("listening for voice command");

        let window = match self
            .source
            .capture(self.settings.sample_rate, self.settings.window)
        {
            Ok(window) => window.fit_to(self.settings.window_samples()),
            Err(e) => {
                warn!(?e, "voice capture failed");
                return Direction::Stop;
            }
        };

        match self.classifier.classify(&window) {
            Ok(c) if c.confidence > self.settings.threshold => {
                info!(label = %c.label, confidence = c.confidence, "voice command detected");
                c.label
            }
            Ok(c) => {
                debug!(
                    label = %c.label,
                    confidence = c.confidence,
                    threshold = self.settings.threshold,
                    "confidence below threshold"
                );
                Direction::Stop
            }
            Err(e) => {
                warn!(?e, "voice classification failed");
                Direction::Stop
            }
        }
    }
}

impl<A: AudioSource, C: VoiceClassifier> DirectionProducer for VoiceAdapter<A, C> {
    fn name(&self) -> &'static str {
        "voice"
    }

    fn produce(&mut self, ctx: &mut dyn ProduceContext) -> Direction {
        let direction = self.listen();
        ctx.report(direction);
        direction
    }
}
