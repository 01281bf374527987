//! Process-backed collaborators
//!
//! Audio capture, keyword classification and face landmark detection live
//! outside this process. These types talk to them over pipes and plug into
//! the producer adapters.

mod face;
mod helper;
mod voice;

pub use face::{HelperFrameSource, RecordDetector};
pub use helper::HelperTimeouts;
pub use voice::{CommandAudioSource, HelperClassifier};

use std::time::Duration;

use crate::config::Config;
use crate::producer::{FaceAdapter, VoiceAdapter};
use crate::state::Producers;

/// Errors talking to a helper process
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to start helper {0:?}: {1}")]
    Spawn(String, String),

    #[error("helper I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("helper closed its output")]
    Closed,

    #[error("helper did not answer within {0:?}")]
    Timeout(Duration),
}

/// Build both adapters from configuration. Helpers start on first use.
pub fn producers(config: &Config) -> Producers {
    let classifier_timeouts = HelperTimeouts {
        startup: config.helper_startup,
        reply: config.classifier_timeout,
    };
    let frame_timeouts = HelperTimeouts {
        startup: config.helper_startup,
        reply: config.frame_timeout,
    };

    let voice = VoiceAdapter::new(
        CommandAudioSource::new(&config.capture_command, config.capture_grace),
        HelperClassifier::new(&config.classifier_command, classifier_timeouts),
        config.voice(),
    );
    let face = FaceAdapter::new(
        HelperFrameSource::new(&config.face_command, frame_timeouts),
        RecordDetector,
        config.geometry(),
    );

    Producers {
        voice: Box::new(voice),
        face: Box::new(face),
    }
}
