//! Configuration loading and management
//!
//! Every setting has a built-in default and can be overridden with an
//! `ARBITER_*` environment variable.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::link::LinkConfig;
use crate::producer::{GeometryConfig, VoiceSettings};
use crate::state::ControllerSettings;

/// Arbiter configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Serial device of the motor controller link
    pub serial_port: String,
    pub baud_rate: u32,

    /// Sleep between poll cycles; also the link read timeout
    pub poll_interval: Duration,
    /// Consecutive link failures before shutting down
    pub max_link_failures: u32,

    /// Repeat floor for voice directives
    pub voice_interval: Duration,
    /// Repeat floor for face directives
    pub face_interval: Duration,

    /// Minimum classifier confidence (exclusive)
    pub voice_threshold: f32,
    pub sample_rate: u32,
    pub capture_window: Duration,

    pub down_threshold: i32,
    pub center_tolerance: i32,

    /// Audio capture command; `{rate}` and `{secs}` are substituted
    pub capture_command: String,
    /// Long-lived voice classifier helper
    pub classifier_command: String,
    /// Long-lived face tracker helper
    pub face_command: String,

    /// Extra time a capture may take beyond its window
    pub capture_grace: Duration,
    /// Allowance for a helper's first line after it starts
    pub helper_startup: Duration,
    /// Deadline for each classifier reply
    pub classifier_timeout: Duration,
    /// Deadline for each tracker frame
    pub frame_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyAMA0".to_string(),
            baud_rate: 9600,
            poll_interval: Duration::from_millis(100),
            max_link_failures: 5,
            voice_interval: Duration::from_secs(2),
            face_interval: Duration::from_millis(500),
            voice_threshold: 0.70,
            sample_rate: 8000,
            capture_window: Duration::from_secs(1),
            down_threshold: 25,
            center_tolerance: 20,
            capture_command: "arecord -q -t raw -f FLOAT_LE -c 1 -r {rate} -d {secs}".to_string(),
            classifier_command: "voice-classifier".to_string(),
            face_command: "face-tracker".to_string(),
            capture_grace: Duration::from_secs(2),
            helper_startup: Duration::from_secs(10),
            classifier_timeout: Duration::from_secs(3),
            frame_timeout: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = Env { lookup };

        let config = Self {
            serial_port: env.string("ARBITER_SERIAL_PORT", defaults.serial_port),
            baud_rate: env.parse("ARBITER_BAUD_RATE", defaults.baud_rate)?,
            poll_interval: env.millis("ARBITER_POLL_INTERVAL_MS", defaults.poll_interval)?,
            max_link_failures: env.parse("ARBITER_MAX_LINK_FAILURES", defaults.max_link_failures)?,
            voice_interval: env.secs("ARBITER_VOICE_INTERVAL_SECS", defaults.voice_interval)?,
            face_interval: env.secs("ARBITER_FACE_INTERVAL_SECS", defaults.face_interval)?,
            voice_threshold: env.parse("ARBITER_VOICE_THRESHOLD", defaults.voice_threshold)?,
            sample_rate: env.parse("ARBITER_SAMPLE_RATE", defaults.sample_rate)?,
            capture_window: env.secs("ARBITER_CAPTURE_WINDOW_SECS", defaults.capture_window)?,
            down_threshold: env.parse("ARBITER_FACE_DOWN_THRESHOLD", defaults.down_threshold)?,
            center_tolerance: env.parse("ARBITER_FACE_CENTER_TOLERANCE", defaults.center_tolerance)?,
            capture_command: env.string("ARBITER_CAPTURE_CMD", defaults.capture_command),
            classifier_command: env.string("ARBITER_CLASSIFIER_CMD", defaults.classifier_command),
            face_command: env.string("ARBITER_FACE_CMD", defaults.face_command),
            capture_grace: env.secs("ARBITER_CAPTURE_GRACE_SECS", defaults.capture_grace)?,
            helper_startup: env.secs("ARBITER_HELPER_STARTUP_SECS", defaults.helper_startup)?,
            classifier_timeout: env.secs("ARBITER_CLASSIFIER_TIMEOUT_SECS", defaults.classifier_timeout)?,
            frame_timeout: env.secs("ARBITER_FRAME_TIMEOUT_SECS", defaults.frame_timeout)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.voice_threshold) {
            bail!("voice threshold must be within 0..=1, got {}", self.voice_threshold);
        }
        if self.max_link_failures == 0 {
            bail!("max link failures must be at least 1");
        }
        if self.sample_rate == 0 || self.capture_window.is_zero() {
            bail!("audio capture window must be non-empty");
        }
        if self.baud_rate == 0 {
            bail!("baud rate must be positive");
        }
        if [self.helper_startup, self.classifier_timeout, self.frame_timeout]
            .iter()
            .any(Duration::is_zero)
        {
            bail!("helper timeouts must be positive");
        }
        Ok(())
    }

    pub fn link(&self) -> LinkConfig {
        LinkConfig {
            path: self.serial_port.clone(),
            baud_rate: self.baud_rate,
            read_timeout: self.poll_interval,
        }
    }

    pub fn controller(&self) -> ControllerSettings {
        ControllerSettings {
            voice_interval: self.voice_interval,
            face_interval: self.face_interval,
            poll_interval: self.poll_interval,
            max_link_failures: self.max_link_failures,
        }
    }

    pub fn voice(&self) -> VoiceSettings {
        VoiceSettings {
            threshold: self.voice_threshold,
            sample_rate: self.sample_rate,
            window: self.capture_window,
        }
    }

    pub fn geometry(&self) -> GeometryConfig {
        GeometryConfig {
            down_threshold: self.down_threshold,
            center_tolerance: self.center_tolerance,
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: String) -> String {
        self.raw(key).unwrap_or(default)
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.raw(key) {
            Some(value) => value
                .parse()
                .with_context(|| format!("invalid value {:?} for {}", value, key)),
            None => Ok(default),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration> {
        match self.raw(key) {
            Some(value) => {
                let secs: f64 = value
                    .parse()
                    .with_context(|| format!("invalid value {:?} for {}", value, key))?;
                Duration::try_from_secs_f64(secs)
                    .with_context(|| format!("invalid duration {:?} for {}", value, key))
            }
            None => Ok(default),
        }
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration> {
        self.parse::<u64>(key, default.as_millis() as u64)
            .map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.serial_port, "/dev/ttyAMA0");
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.voice_interval, Duration::from_secs(2));
        assert_eq!(config.face_interval, Duration::from_millis(500));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert!((config.voice_threshold - 0.70).abs() < f32::EPSILON);
        assert_eq!(config.voice().window_samples(), 8000);
        assert_eq!(config.geometry(), GeometryConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("ARBITER_SERIAL_PORT", "/dev/serial0"),
            ("ARBITER_BAUD_RATE", "115200"),
            ("ARBITER_FACE_INTERVAL_SECS", "0.25"),
            ("ARBITER_POLL_INTERVAL_MS", "50"),
            ("ARBITER_VOICE_THRESHOLD", "0.8"),
        ])
        .unwrap();
        assert_eq!(config.serial_port, "/dev/serial0");
        assert_eq!(config.link().baud_rate, 115200);
        assert_eq!(config.link().read_timeout, Duration::from_millis(50));
        assert_eq!(config.controller().face_interval, Duration::from_millis(250));
        assert!((config.voice().threshold - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = load(&[("ARBITER_SERIAL_PORT", "  ")]).unwrap();
        assert_eq!(config.serial_port, "/dev/ttyAMA0");
    }

    #[test]
    fn test_malformed_value_names_variable() {
        let err = load(&[("ARBITER_BAUD_RATE", "fast")]).unwrap_err();
        assert!(err.to_string().contains("ARBITER_BAUD_RATE"));

        let err = load(&[("ARBITER_VOICE_INTERVAL_SECS", "-1")]).unwrap_err();
        assert!(err.to_string().contains("ARBITER_VOICE_INTERVAL_SECS"));
    }

    #[test]
    fn test_validation() {
        assert!(load(&[("ARBITER_VOICE_THRESHOLD", "1.5")]).is_err());
        assert!(load(&[("ARBITER_MAX_LINK_FAILURES", "0")]).is_err());
        assert!(load(&[("ARBITER_CAPTURE_WINDOW_SECS", "0")]).is_err());
        assert!(load(&[("ARBITER_FRAME_TIMEOUT_SECS", "0")]).is_err());
    }

    #[test]
    fn test_helper_deadlines() {
        let config = load(&[("ARBITER_CLASSIFIER_TIMEOUT_SECS", "4.5")]).unwrap();
        assert_eq!(config.classifier_timeout, Duration::from_millis(4500));
        assert_eq!(config.frame_timeout, Duration::from_secs(1));
        assert_eq!(config.helper_startup, Duration::from_secs(10));
        assert_eq!(config.capture_grace, Duration::from_secs(2));
    }
}
