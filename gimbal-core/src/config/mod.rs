//! Runtime configuration for the tracking pipeline.
//!
//! Every knob ships with a default matching the reference deployment, so an
//! empty TOML document (or no file at all) is a valid configuration. A file
//! only needs to name the values it overrides.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for per-track face crops. Cleared at startup.
    pub storage_root: PathBuf,

    pub capture: CaptureConfig,
    pub identity: IdentityConfig,
    pub control: ControlConfig,
    pub servo: ServoConfig,
    pub detector: DetectorConfig,
    pub tracker: TrackerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("recognition"),
            capture: CaptureConfig::default(),
            identity: IdentityConfig::default(),
            control: ControlConfig::default(),
            servo: ServoConfig::default(),
            detector: DetectorConfig::default(),
            tracker: TrackerConfig::default(),
        }
    }
}

impl Config {
    /// Load and validate a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Parse and validate a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize config")
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.capture.capture_limit == 0 {
            bail!("capture.capture_limit must be at least 1");
        }
        if self.capture.frame_skip == 0 {
            bail!("capture.frame_skip must be at least 1");
        }
        if self.identity.fingerprint_dim == 0 {
            bail!("identity.fingerprint_dim must be at least 1");
        }
        let threshold = self.identity.similarity_threshold;
        if !threshold.is_finite() || !(-1.0..=1.0).contains(&threshold) {
            bail!("identity.similarity_threshold must lie in [-1, 1], got {threshold}");
        }
        let c = &self.control;
        if c.pan_min > c.pan_max {
            bail!("control.pan_min {} exceeds control.pan_max {}", c.pan_min, c.pan_max);
        }
        if c.tilt_min > c.tilt_max {
            bail!("control.tilt_min {} exceeds control.tilt_max {}", c.tilt_min, c.tilt_max);
        }
        if !(c.pan_min..=c.pan_max).contains(&c.pan_start) {
            bail!("control.pan_start {} outside [{}, {}]", c.pan_start, c.pan_min, c.pan_max);
        }
        if !(c.tilt_min..=c.tilt_max).contains(&c.tilt_start) {
            bail!("control.tilt_start {} outside [{}, {}]", c.tilt_start, c.tilt_min, c.tilt_max);
        }
        if c.step_size < 1 {
            bail!("control.step_size must be at least 1");
        }
        if c.x_threshold < 0 || c.y_threshold < 0 {
            bail!("control dead-zone thresholds must be non-negative");
        }
        Ok(())
    }
}

// ── Sections ─────────────────────────────────────────────────────────────────

/// Face-crop capture gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Crops persisted per track before resolution runs.
    pub capture_limit: u32,
    /// Only every Nth frame is eligible for capture.
    pub frame_skip: u64,
    /// Pixels added on each side of the detected box before cropping.
    pub crop_margin: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capture_limit: 5,
            frame_skip: 2,
            crop_margin: 100,
        }
    }
}

/// Fingerprinting and dedup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Expected embedding length; vectors of any other length are rejected.
    pub fingerprint_dim: usize,
    /// Cosine similarity above which an index hit counts as the same person.
    pub similarity_threshold: f32,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            fingerprint_dim: 512,
            similarity_threshold: 0.5,
        }
    }
}

/// Feedback-law geometry and actuator ranges.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub pan_min: i32,
    pub pan_max: i32,
    pub pan_start: i32,
    pub tilt_min: i32,
    pub tilt_max: i32,
    pub tilt_start: i32,
    /// Fixed correction step per frame, in servo units.
    pub step_size: i32,
    /// Horizontal dead-zone half-width in pixels.
    pub x_threshold: i32,
    /// Vertical dead-zone half-height in pixels.
    pub y_threshold: i32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            pan_min: 1450,
            pan_max: 3100,
            pan_start: 2560,
            tilt_min: 2250,
            tilt_max: 3000,
            tilt_start: 2625,
            step_size: 15,
            x_threshold: 100,
            y_threshold: 50,
        }
    }
}

/// Serial transport parameters for the pan/tilt unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    pub port: String,
    pub baud_rate: u32,
    pub moving_speed: u16,
    pub moving_accel: u8,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            port: String::from("COM7"),
            baud_rate: 1_000_000,
            moving_speed: 3000,
            moving_accel: 150,
        }
    }
}

/// Pass-through options for the external face detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub min_confidence: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
        }
    }
}

/// Pass-through options for the external tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Frames a track survives without a matching detection.
    pub max_age: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { max_age: 10 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.capture.capture_limit, 5);
        assert_eq!(config.capture.frame_skip, 2);
        assert_eq!(config.identity.fingerprint_dim, 512);
        assert_eq!(config.control.pan_start, 2560);
        assert_eq!(config.servo.baud_rate, 1_000_000);
        assert_eq!(config.storage_root, PathBuf::from("recognition"));
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let toml = r#"
            storage_root = "/tmp/faces"

            [capture]
            capture_limit = 8

            [control]
            step_size = 20
        "#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.storage_root, PathBuf::from("/tmp/faces"));
        assert_eq!(config.capture.capture_limit, 8);
        assert_eq!(config.capture.frame_skip, 2);
        assert_eq!(config.control.step_size, 20);
        assert_eq!(config.control.x_threshold, 100);
    }

    #[test]
    fn rejects_zero_frame_skip() {
        let result = Config::from_toml("[capture]\nframe_skip = 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_inverted_pan_range() {
        let result = Config::from_toml("[control]\npan_min = 3200\n");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_start_outside_range() {
        let result = Config::from_toml("[control]\ntilt_start = 100\n");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let result = Config::from_toml("[identity]\nsimilarity_threshold = 1.5\n");
        assert!(result.is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gimbal.toml");
        std::fs::write(&path, "[servo]\nport = \"/dev/ttyUSB0\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.servo.port, "/dev/ttyUSB0");
        assert_eq!(config.servo.moving_speed, 3000);
    }

    #[test]
    fn round_trips_through_toml() {
        let toml = Config::default().to_toml().unwrap();
        let config = Config::from_toml(&toml).unwrap();
        assert_eq!(config.control.tilt_start, 2625);
        assert_eq!(config.tracker.max_age, 10);
        assert_eq!(config.detector.min_confidence, 0.5);
    }
}
