//! control — steering law for the pan/tilt head.
//!
//! Bang-bang control with a rectangular dead zone: while the subject sits
//! within the per-axis pixel thresholds of frame center the head holds
//! still, otherwise both axes step one fixed increment toward the subject
//! and the result is clamped to the mechanical range. Fixed-size steps keep
//! the motion smooth at the cost of convergence speed.

use crate::config::ControlConfig;

/// Absolute pan/tilt pose in raw servo units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GimbalPosition {
    pub pan: i32,
    pub tilt: i32,
}

impl GimbalPosition {
    /// Centered start pose.
    pub fn start(config: &ControlConfig) -> Self {
        Self {
            pan: config.pan_start,
            tilt: config.tilt_start,
        }
    }

    /// Pose limited to the configured mechanical range.
    pub fn clamped(self, config: &ControlConfig) -> Self {
        Self {
            pan: self.pan.clamp(config.pan_min, config.pan_max),
            tilt: self.tilt.clamp(config.tilt_min, config.tilt_max),
        }
    }
}

/// One steering decision for a subject at pixel `subject` in a frame whose
/// center is `frame_center`. Returns the next pose, or `None` when the
/// subject is inside the dead zone and no servo write should happen.
///
/// The displacement is measured from the subject to frame center, and the
/// step runs against its sign on each axis. The gate is joint: one axis
/// leaving its threshold steps both axes, with an axis whose error is
/// exactly zero left where it is.
pub fn steer(
    current: GimbalPosition,
    subject: (i32, i32),
    frame_center: (i32, i32),
    config: &ControlConfig,
) -> Option<GimbalPosition> {
    let dx = frame_center.0 - subject.0;
    let dy = frame_center.1 - subject.1;

    if dx.abs() <= config.x_threshold && dy.abs() <= config.y_threshold {
        return None;
    }

    let next = GimbalPosition {
        pan: current.pan - dx.signum() * config.step_size,
        tilt: current.tilt - dy.signum() * config.step_size,
    };
    Some(next.clamped(config))
}
