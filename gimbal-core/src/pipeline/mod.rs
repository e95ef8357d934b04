//! pipeline — per-frame orchestration of tracking, capture, identity and
//! steering.
//!
//! One frame flows detect → track → capture/resolve → overlay → steer →
//! sink. Component failures inside a frame are logged and drop that frame's
//! remaining work; only startup failures end the run.

use std::collections::HashSet;
use std::io::ErrorKind;

use anyhow::{Context, Result};

use crate::capture;
use crate::config::Config;
use crate::control;
use crate::detection::{self, FaceDetector, SubjectTracker, TrackId, TrackedFace};
use crate::identity::IdentityResolver;
use crate::registry::TrackRegistry;
use crate::servo::GimbalController;
use crate::video::{FrameSink, FrameSource, RgbFrame};

/// Overlay color for confirmed track boxes.
const TRACK_COLOR: [u8; 3] = [0, 255, 0];
/// Overlay color for the frame-center cross and steering line.
const STEERING_COLOR: [u8; 3] = [0, 0, 255];

pub struct Pipeline {
    config: Config,
    source: Box<dyn FrameSource>,
    detector: Box<dyn FaceDetector>,
    tracker: Box<dyn SubjectTracker>,
    registry: TrackRegistry,
    resolver: IdentityResolver,
    gimbal: GimbalController,
    sink: Option<Box<dyn FrameSink>>,
    frame_index: u64,
}

impl Pipeline {
    pub fn new(
        config: Config,
        source: Box<dyn FrameSource>,
        detector: Box<dyn FaceDetector>,
        tracker: Box<dyn SubjectTracker>,
        resolver: IdentityResolver,
        gimbal: GimbalController,
    ) -> Self {
        let registry = TrackRegistry::new(config.storage_root.clone());
        Self {
            config,
            source,
            detector,
            tracker,
            registry,
            resolver,
            gimbal,
            sink: None,
            frame_index: 0,
        }
    }

    /// Attach a consumer for annotated frames.
    pub fn with_sink(mut self, sink: Box<dyn FrameSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn frames_processed(&self) -> u64 {
        self.frame_index
    }

    pub fn registry(&self) -> &TrackRegistry {
        &self.registry
    }

    pub fn gimbal(&self) -> &GimbalController {
        &self.gimbal
    }

    /// Sweep stale captures, open the servo link and center the head.
    /// Any failure here aborts the run before the first frame.
    fn startup(&mut self) -> Result<()> {
        match std::fs::remove_dir_all(&self.config.storage_root) {
            Ok(()) => tracing::debug!(
                path = %self.config.storage_root.display(),
                "cleared stale capture storage"
            ),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e).context("failed to clear capture storage"),
        }
        std::fs::create_dir_all(&self.config.storage_root)
            .context("failed to create capture storage")?;

        self.gimbal.connect()?;
        self.gimbal.center().context("initial centering move failed")?;
        tracing::info!("pipeline ready");
        Ok(())
    }

    /// Consume the source until it ends. Read errors skip the frame and
    /// keep the loop alive, matching a camera that drops frames under load.
    pub fn run(&mut self) -> Result<()> {
        self.startup()?;

        loop {
            match self.source.next_frame() {
                Ok(Some(frame)) => self.process_frame(frame),
                Ok(None) => break,
                Err(e) => tracing::warn!("frame read error: {e:#}"),
            }
        }

        tracing::info!(frames = self.frame_index, "stream ended");
        Ok(())
    }

    /// Run one frame through the full chain.
    pub fn process_frame(&mut self, mut frame: RgbFrame) {
        self.frame_index += 1;

        let detections = match self.detector.detect(&frame) {
            Ok(detections) => detections,
            Err(e) => {
                tracing::warn!("detection error: {e:#}");
                return;
            }
        };
        if detections.is_empty() {
            tracing::debug!(frame = self.frame_index, "no faces detected");
        }

        let tracks = match self.tracker.update(&detections, &frame) {
            Ok(tracks) => tracks,
            Err(e) => {
                tracing::warn!("tracking error: {e:#}");
                return;
            }
        };

        let active: HashSet<TrackId> = tracks.iter().map(|t| t.id).collect();
        self.registry.retain_active(&active);

        let confirmed: Vec<TrackedFace> =
            tracks.into_iter().filter(|t| t.is_confirmed()).collect();

        // Capture from the clean frame before any overlay lands on it.
        for track in &confirmed {
            self.handle_track(track, &frame);
        }

        detection::draw_tracks(&mut frame, &confirmed, TRACK_COLOR);

        // The head follows the first confirmed track; which track that is
        // can change between frames when tracks come and go.
        if let Some(primary) = confirmed.first() {
            self.steer_towards(primary, &mut frame);
        }

        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.deliver(&frame) {
                tracing::warn!("frame sink error: {e:#}");
            }
        }
    }

    /// Capture gating and, once a track has its full crop set, identity
    /// resolution.
    fn handle_track(&mut self, track: &TrackedFace, frame: &RgbFrame) {
        let record = self.registry.get_or_create(track.id);

        if capture::should_capture(record, self.frame_index, &self.config.capture) {
            if let Err(e) =
                capture::save_face_crop(frame, &track.bbox, record, &self.config.capture)
            {
                tracing::warn!(track_id = track.id, "crop save error: {e:#}");
            }
        }

        if record.ready_for_resolution(self.config.capture.capture_limit) {
            self.resolver.resolve(record);
        }
    }

    fn steer_towards(&mut self, subject: &TrackedFace, frame: &mut RgbFrame) {
        let subject_center = subject.bbox.center();
        detection::draw_steering_overlay(frame, subject_center, STEERING_COLOR);

        let frame_center = frame.center();
        tracing::debug!(
            track_id = subject.id,
            dx = frame_center.0 - subject_center.0,
            dy = frame_center.1 - subject_center.1,
            "steering error"
        );

        let decision = control::steer(
            self.gimbal.position(),
            subject_center,
            frame_center,
            &self.config.control,
        );
        if let Some(next) = decision {
            if let Err(e) = self.gimbal.move_to(next) {
                tracing::warn!("gimbal move error: {e:#}");
            }
        }
    }
}
