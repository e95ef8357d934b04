//! servo — transport seam and pose bookkeeping for the pan/tilt head.
//!
//! The bus protocol lives behind [`ServoLink`]; the controller layers the
//! configured motion profile and mechanical limits on top and tracks the
//! last pose the hardware acknowledged.

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::{ControlConfig, ServoConfig};
use crate::control::GimbalPosition;

/// Serial transport for the two-servo head. Implementations send a grouped
/// position command so pan and tilt latch on the same control tick.
pub trait ServoLink {
    fn open(&mut self) -> Result<()>;
    fn write_position(&mut self, pan: i32, tilt: i32, speed: u16, accel: u8) -> Result<()>;
}

/// Owns the link plus the last acknowledged pose.
pub struct GimbalController {
    link: Box<dyn ServoLink>,
    position: GimbalPosition,
    control: ControlConfig,
    servo: ServoConfig,
}

impl GimbalController {
    /// Controller starting from the configured center pose. No commands are
    /// sent until [`connect`](Self::connect) succeeds.
    pub fn new(link: Box<dyn ServoLink>, control: ControlConfig, servo: ServoConfig) -> Self {
        let position = GimbalPosition::start(&control);
        Self {
            link,
            position,
            control,
            servo,
        }
    }

    /// Open the transport. Required before any motion command.
    pub fn connect(&mut self) -> Result<()> {
        self.link
            .open()
            .with_context(|| format!("failed to open servo link on {}", self.servo.port))?;
        info!(
            port = %self.servo.port,
            baud = self.servo.baud_rate,
            "servo link open"
        );
        Ok(())
    }

    /// Drive the head to the configured start pose.
    pub fn center(&mut self) -> Result<()> {
        self.move_to(GimbalPosition::start(&self.control))
    }

    /// Last pose the hardware acknowledged.
    pub fn position(&self) -> GimbalPosition {
        self.position
    }

    /// Command an absolute pose, limited to the mechanical range. The cached
    /// pose only advances once the write is acknowledged, so after a failed
    /// write the controller still agrees with where the head is.
    pub fn move_to(&mut self, target: GimbalPosition) -> Result<()> {
        let target = target.clamped(&self.control);
        self.link
            .write_position(
                target.pan,
                target.tilt,
                self.servo.moving_speed,
                self.servo.moving_accel,
            )
            .context("servo position write failed")?;
        debug!(pan = target.pan, tilt = target.tilt, "gimbal moved");
        self.position = target;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingLink {
        opened: Arc<AtomicBool>,
        writes: Arc<Mutex<Vec<(i32, i32, u16, u8)>>>,
        fail_open: bool,
        fail_writes: bool,
    }

    impl ServoLink for RecordingLink {
        fn open(&mut self) -> Result<()> {
            if self.fail_open {
                bail!("port busy");
            }
            self.opened.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn write_position(&mut self, pan: i32, tilt: i32, speed: u16, accel: u8) -> Result<()> {
            if self.fail_writes {
                bail!("bus timeout");
            }
            self.writes.lock().unwrap().push((pan, tilt, speed, accel));
            Ok(())
        }
    }

    fn controller(link: RecordingLink) -> GimbalController {
        GimbalController::new(
            Box::new(link),
            ControlConfig::default(),
            ServoConfig::default(),
        )
    }

    #[test]
    fn connect_opens_the_link() {
        let link = RecordingLink::default();
        let opened = link.opened.clone();

        let mut gimbal = controller(link);
        gimbal.connect().unwrap();
        assert!(opened.load(Ordering::SeqCst));
    }

    #[test]
    fn open_failure_names_the_port() {
        let mut gimbal = controller(RecordingLink {
            fail_open: true,
            ..Default::default()
        });

        let err = gimbal.connect().unwrap_err();
        assert!(format!("{err:#}").contains("COM7"));
    }

    #[test]
    fn center_writes_start_pose_with_motion_profile() {
        let link = RecordingLink::default();
        let writes = link.writes.clone();

        let mut gimbal = controller(link);
        gimbal.center().unwrap();

        assert_eq!(writes.lock().unwrap().as_slice(), &[(2560, 2625, 3000, 150)]);
        assert_eq!(gimbal.position(), GimbalPosition { pan: 2560, tilt: 2625 });
    }

    #[test]
    fn move_to_clamps_into_mechanical_range() {
        let link = RecordingLink::default();
        let writes = link.writes.clone();

        let mut gimbal = controller(link);
        gimbal
            .move_to(GimbalPosition { pan: 99_999, tilt: -5 })
            .unwrap();

        assert_eq!(writes.lock().unwrap().as_slice(), &[(3100, 2250, 3000, 150)]);
        assert_eq!(gimbal.position(), GimbalPosition { pan: 3100, tilt: 2250 });
    }

    #[test]
    fn failed_write_keeps_the_cached_pose() {
        let mut gimbal = controller(RecordingLink {
            fail_writes: true,
            ..Default::default()
        });
        let before = gimbal.position();

        let result = gimbal.move_to(GimbalPosition { pan: 2500, tilt: 2600 });
        assert!(result.is_err());
        assert_eq!(gimbal.position(), before);
    }
}
