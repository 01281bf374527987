//! Process-backed face tracker
//!
//! The helper owns the camera and the landmark model and prints one JSON
//! record per frame. The camera is held only while face mode is running:
//! [`FrameSource::release`] stops the helper between runs.

use serde::Deserialize;

use super::helper::{HelperProcess, HelperTimeouts};
use crate::producer::{DetectorError, FaceLandmarks, FrameError, FrameSource, LandmarkDetector, NormalizedLandmarks};

/// One frame as reported by the tracker helper
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FrameRecord {
    Failure {
        error: String,
    },
    Observation {
        width: u32,
        height: u32,
        landmarks: Option<NormalizedLandmarks>,
    },
}

fn parse_frame(line: &str) -> Result<FrameRecord, FrameError> {
    serde_json::from_str(line).map_err(|e| FrameError::ReadFailed(format!("malformed frame record: {}", e)))
}

pub struct HelperFrameSource {
    helper: HelperProcess,
    exhausted: bool,
}

impl HelperFrameSource {
    pub fn new(command: &str, timeouts: HelperTimeouts) -> Self {
        Self {
            helper: HelperProcess::new(command, timeouts),
            exhausted: false,
        }
    }
}

impl FrameSource for HelperFrameSource {
    type Frame = FrameRecord;

    fn next_frame(&mut self) -> Result<FrameRecord, FrameError> {
        match self.helper.read_line() {
            Ok(Some(line)) => parse_frame(&line),
            Ok(None) => {
                self.exhausted = true;
                Err(FrameError::Exhausted)
            }
            Err(e) => Err(FrameError::ReadFailed(e.to_string())),
        }
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn release(&mut self) {
        self.helper.stop();
        self.exhausted = false;
    }
}

/// Turns helper records into pixel landmarks
#[derive(Debug, Default)]
pub struct RecordDetector;

impl LandmarkDetector<FrameRecord> for RecordDetector {
    fn detect(&mut self, frame: &FrameRecord) -> Result<Option<FaceLandmarks>, DetectorError> {
        match frame {
            FrameRecord::Failure { error } => Err(DetectorError::Failed(error.clone())),
            FrameRecord::Observation {
                width,
                height,
                landmarks,
            } => match landmarks {
                None => Ok(None),
                Some(l) => l
                    .to_pixels(*width, *height)
                    .map(Some)
                    .ok_or_else(|| DetectorError::Failed(format!("implausible landmarks {:?}", l))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::bridge::helper::testing::{impatient, patient};
    use crate::link::Direction;
    use crate::producer::testing::RecordingContext;
    use crate::producer::{DirectionProducer, FaceAdapter, GeometryConfig};

    #[test]
    fn test_parse_observation() {
        let record = parse_frame(
            r#"{"width":640,"height":480,"landmarks":{"nose":[0.5,0.5],"left_eye":[0.4,0.5],"right_eye":[0.6,0.5]}}"#,
        )
        .unwrap();
        let landmarks = RecordDetector.detect(&record).unwrap().unwrap();
        assert_eq!((landmarks.nose.x, landmarks.nose.y), (320, 240));
        assert_eq!(landmarks.left_eye.y, 240);
    }

    #[test]
    fn test_parse_frame_without_face() {
        let record = parse_frame(r#"{"width":640,"height":480,"landmarks":null}"#).unwrap();
        assert_eq!(RecordDetector.detect(&record).unwrap(), None);
    }

    #[test]
    fn test_error_record_is_detector_failure() {
        let record = parse_frame(r#"{"error":"mesh init failed"}"#).unwrap();
        assert!(RecordDetector.detect(&record).is_err());
    }

    #[test]
    fn test_malformed_record() {
        assert!(matches!(parse_frame("{"), Err(FrameError::ReadFailed(_))));
    }

    #[test]
    fn test_helper_eof_exhausts_source_until_released() {
        let mut source = HelperFrameSource::new(r#"echo {"width":4,"height":4,"landmarks":null}"#, patient());

        assert!(matches!(
            source.next_frame(),
            Ok(FrameRecord::Observation { landmarks: None, .. })
        ));
        assert!(!source.is_exhausted());
        assert!(matches!(source.next_frame(), Err(FrameError::Exhausted)));
        assert!(source.is_exhausted());

        source.release();
        assert!(!source.is_exhausted());
    }

    #[test]
    fn test_missing_helper_is_read_failure() {
        let mut source = HelperFrameSource::new("motion-arbiter-no-such-tracker", patient());
        assert!(matches!(source.next_frame(), Err(FrameError::ReadFailed(_))));
    }

    #[test]
    fn test_out_of_range_landmarks_are_detector_failures() {
        let record = parse_frame(
            r#"{"width":640,"height":480,"landmarks":{"nose":[0.5,0.5],"left_eye":[0.4,1e10],"right_eye":[0.6,1e10]}}"#,
        )
        .unwrap();
        assert!(matches!(RecordDetector.detect(&record), Err(DetectorError::Failed(_))));
    }

    #[test]
    fn test_face_adapter_stops_on_garbage_tracker_output() {
        let source = HelperFrameSource::new(
            r#"echo {"width":640,"height":480,"landmarks":{"nose":[0.5,0.5],"left_eye":[0.4,1e10],"right_eye":[0.6,1e10]}}"#,
            patient(),
        );
        let mut face = FaceAdapter::new(source, RecordDetector, GeometryConfig::default());
        let mut ctx = RecordingContext::default();

        assert_eq!(face.produce(&mut ctx), Direction::Stop);
        assert!(ctx.reported.is_empty());
    }

    #[test]
    fn test_stalled_tracker_fails_within_deadline() {
        let mut source = HelperFrameSource::new("sleep 30", impatient());
        let started = Instant::now();

        assert!(matches!(source.next_frame(), Err(FrameError::ReadFailed(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
