//! Process-backed audio capture and voice classification

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::helper::{HelperProcess, HelperTimeouts};
use super::BridgeError;
use crate::link::Direction;
use crate::producer::{
    AudioSource, AudioWindow, CaptureError, Classification, ClassifierError, VoiceClassifier,
    VOICE_LABELS,
};

/// Records one window by running a capture command that writes raw
/// little-endian f32 mono samples to stdout
pub struct CommandAudioSource {
    template: String,
    /// Time allowed on top of the window before the recorder is killed
    grace: Duration,
}

impl CommandAudioSource {
    pub fn new(template: &str, grace: Duration) -> Self {
        Self {
            template: template.to_string(),
            grace,
        }
    }

    fn args(&self, sample_rate: u32, window: Duration) -> Vec<String> {
        let secs = window.as_secs_f64().ceil().max(1.0) as u64;
        self.template
            .split_whitespace()
            .map(|part| {
                part.replace("{rate}", &sample_rate.to_string())
                    .replace("{secs}", &secs.to_string())
            })
            .collect()
    }
}

impl AudioSource for CommandAudioSource {
    fn capture(&mut self, sample_rate: u32, window: Duration) -> Result<AudioWindow, CaptureError> {
        let args = self.args(sample_rate, window);
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| CaptureError::Failed("empty capture command".into()))?;

        let mut child = Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        let mut stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                reap(&mut child);
                return Err(CaptureError::Failed("recorder stdout not captured".into()));
            }
        };

        let (tx, rx) = crossbeam_channel::bounded(1);
        thread::spawn(move || {
            let mut bytes = Vec::new();
            let _ = tx.send(stdout.read_to_end(&mut bytes).map(|_| bytes));
        });

        let deadline = window + self.grace;
        let bytes = match rx.recv_timeout(deadline) {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                reap(&mut child);
                return Err(CaptureError::Io(e));
            }
            Err(_) => {
                warn!(%program, ?deadline, "recorder overran its window");
                reap(&mut child);
                return Err(CaptureError::Failed(format!(
                    "{} produced no window within {:?}",
                    program, deadline
                )));
            }
        };

        let status = child.wait()?;
        if !status.success() {
            return Err(CaptureError::Failed(format!(
                "{} exited with {}",
                program, status
            )));
        }

        let samples = decode_samples(&bytes);
        debug!(samples = samples.len(), "audio window captured");
        Ok(AudioWindow { sample_rate, samples })
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Raw f32 LE bytes to samples; a trailing partial sample is dropped
fn decode_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    sample_rate: u32,
    samples: &'a [f32],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClassifyReply {
    Label { label: String, confidence: f32 },
    Scores { scores: Vec<f32> },
    Failure { error: String },
}

fn parse_reply(line: &str) -> Result<Classification, ClassifierError> {
    let reply: ClassifyReply =
        serde_json::from_str(line).map_err(|e| ClassifierError::Protocol(e.to_string()))?;

    match reply {
        ClassifyReply::Label { label, confidence } => {
            let label: Direction = label
                .parse()
                .map_err(|e: crate::link::UnknownDirection| ClassifierError::Protocol(e.to_string()))?;
            if !VOICE_LABELS.contains(&label) {
                return Err(ClassifierError::Protocol(format!("{} is not a voice label", label)));
            }
            Ok(Classification { label, confidence })
        }
        ClassifyReply::Scores { scores } => Classification::from_scores(&scores).ok_or_else(|| {
            ClassifierError::Protocol(format!("expected 5 finite scores, got {:?}", scores))
        }),
        ClassifyReply::Failure { error } => Err(ClassifierError::Failed(error)),
    }
}

/// Keyword classifier running in a long-lived helper process
pub struct HelperClassifier {
    helper: HelperProcess,
}

impl HelperClassifier {
    pub fn new(command: &str, timeouts: HelperTimeouts) -> Self {
        Self {
            helper: HelperProcess::new(command, timeouts),
        }
    }
}

impl VoiceClassifier for HelperClassifier {
    fn classify(&mut self, window: &AudioWindow) -> Result<Classification, ClassifierError> {
        let request = serde_json::to_string(&ClassifyRequest {
            sample_rate: window.sample_rate,
            samples: &window.samples,
        })
        .map_err(|e| ClassifierError::Protocol(e.to_string()))?;

        let reply = self.helper.request(&request).map_err(ClassifierError::from)?;
        parse_reply(&reply)
    }
}

impl From<BridgeError> for ClassifierError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::Io(e) => ClassifierError::Io(e),
            other => ClassifierError::Failed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::bridge::helper::testing::{impatient, patient};

    const GRACE: Duration = Duration::from_secs(2);

    #[test]
    fn test_capture_args_substitute_rate_and_seconds() {
        let source = CommandAudioSource::new("arecord -r {rate} -d {secs}", GRACE);
        assert_eq!(
            source.args(8000, Duration::from_secs(1)),
            vec!["arecord", "-r", "8000", "-d", "1"]
        );
        assert_eq!(source.args(16000, Duration::from_millis(1500))[4], "2");
    }

    #[test]
    fn test_decode_samples() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0.5f32.to_le_bytes());
        bytes.extend_from_slice(&(-1.0f32).to_le_bytes());
        bytes.push(0x01);
        assert_eq!(decode_samples(&bytes), vec![0.5, -1.0]);
    }

    #[test]
    fn test_failing_capture_command() {
        let mut source = CommandAudioSource::new("false", GRACE);
        assert!(matches!(
            source.capture(8000, Duration::from_secs(1)),
            Err(CaptureError::Failed(_))
        ));
    }

    #[test]
    fn test_missing_capture_program() {
        let mut source = CommandAudioSource::new("motion-arbiter-no-such-recorder", GRACE);
        assert!(matches!(
            source.capture(8000, Duration::from_secs(1)),
            Err(CaptureError::Io(_))
        ));
    }

    #[test]
    fn test_label_reply() {
        let c = parse_reply(r#"{"label":"forward","confidence":0.93}"#).unwrap();
        assert_eq!(c.label, Direction::Forward);
        assert!((c.confidence - 0.93).abs() < 1e-6);
    }

    #[test]
    fn test_scores_reply() {
        let c = parse_reply(r#"{"scores":[0.1,0.1,0.1,0.6,0.1]}"#).unwrap();
        assert_eq!(c.label, Direction::Right);
    }

    #[test]
    fn test_error_and_malformed_replies() {
        assert!(matches!(
            parse_reply(r#"{"error":"model not loaded"}"#),
            Err(ClassifierError::Failed(_))
        ));
        assert!(matches!(parse_reply("not json"), Err(ClassifierError::Protocol(_))));
        assert!(matches!(
            parse_reply(r#"{"label":"jump","confidence":0.9}"#),
            Err(ClassifierError::Protocol(_))
        ));
        assert!(matches!(
            parse_reply(r#"{"label":"menu","confidence":0.9}"#),
            Err(ClassifierError::Protocol(_))
        ));
        assert!(matches!(
            parse_reply(r#"{"scores":[0.5,0.5]}"#),
            Err(ClassifierError::Protocol(_))
        ));
    }

    #[test]
    fn test_classifier_with_echoing_helper_is_a_protocol_error() {
        // `cat` echoes the request back, which is not a valid reply
        let mut classifier = HelperClassifier::new("cat", patient());
        let window = AudioWindow {
            sample_rate: 8000,
            samples: vec![0.0; 4],
        };
        assert!(matches!(
            classifier.classify(&window),
            Err(ClassifierError::Protocol(_))
        ));
    }

    #[test]
    fn test_stalled_recorder_is_killed_after_grace() {
        let mut source = CommandAudioSource::new("sleep 30", Duration::from_millis(100));
        let started = Instant::now();

        assert!(matches!(
            source.capture(8000, Duration::from_millis(100)),
            Err(CaptureError::Failed(_))
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_silent_classifier_fails_within_deadline() {
        let mut classifier = HelperClassifier::new("sleep 30", impatient());
        // larger than a pipe buffer, and the helper never reads it
        let window = AudioWindow {
            sample_rate: 16000,
            samples: vec![-0.123_456; 16000],
        };
        let started = Instant::now();

        assert!(matches!(
            classifier.classify(&window),
            Err(ClassifierError::Failed(_))
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
