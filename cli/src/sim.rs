//! sim — synthetic stage for exercising the tracker without hardware.
//!
//! Renders colored stand-ins drifting across a flat backdrop and provides
//! detector, tracker, embedder and analyzer implementations that work off
//! pixel color alone. One stand-in shares its complexion with an earlier
//! one, so a full run demonstrates identity dedup end to end.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use image::{ImageBuffer, RgbImage};
use tracing::{debug, info};

use gimbal_core::detection::{BBox, FaceDetector, SubjectTracker, TrackId, TrackedFace};
use gimbal_core::identity::{Demographics, FaceAnalyzer, FaceEmbedder};
use gimbal_core::servo::ServoLink;
use gimbal_core::video::{FrameSink, FrameSource, RgbFrame};

/// Flat stage backdrop.
const BACKDROP: [u8; 3] = [24, 24, 28];
/// Matched frames before a track counts as confirmed.
const CONFIRM_HITS: u32 = 3;
/// Association radius between a track and a detection, in pixels.
const MATCH_RADIUS: f32 = 80.0;

const ETHNICITY_LABELS: [&str; 6] = [
    "asian",
    "indian",
    "black",
    "white",
    "middle eastern",
    "latino hispanic",
];

/// Stand-in faces are the only warm colors on stage.
fn is_face_color(r: u8, g: u8, b: u8) -> bool {
    r > 140 && r > g && g > b
}

// ── Scene ────────────────────────────────────────────────────────────────────

struct Actor {
    complexion: [u8; 3],
    enter: u64,
    exit: u64,
    x0: f32,
    y0: f32,
    vx: f32,
    vy: f32,
    size: u32,
}

impl Actor {
    fn position(&self, frame_index: u64) -> (f32, f32) {
        let t = (frame_index - self.enter) as f32;
        (self.x0 + self.vx * t, self.y0 + self.vy * t)
    }
}

/// Scripted actors drifting across a flat stage.
pub struct Scene {
    width: u32,
    height: u32,
    actors: Vec<Actor>,
}

impl Scene {
    /// Three-actor demo: two distinct subjects, then a returning one that
    /// shares the first subject's complexion.
    pub fn demo(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            actors: vec![
                Actor {
                    complexion: [205, 160, 122],
                    enter: 0,
                    exit: 90,
                    x0: 80.0,
                    y0: 200.0,
                    vx: 2.0,
                    vy: 0.3,
                    size: 56,
                },
                Actor {
                    complexion: [150, 105, 75],
                    enter: 40,
                    exit: 110,
                    x0: 460.0,
                    y0: 140.0,
                    vx: -1.5,
                    vy: 0.8,
                    size: 48,
                },
                Actor {
                    complexion: [205, 160, 122],
                    enter: 120,
                    exit: 240,
                    x0: 120.0,
                    y0: 260.0,
                    vx: 1.2,
                    vy: -0.4,
                    size: 56,
                },
            ],
        }
    }

    fn render(&self, frame_index: u64) -> RgbFrame {
        let mut frame = RgbFrame::new(self.width, self.height);
        for px in frame.data.chunks_exact_mut(3) {
            px.copy_from_slice(&BACKDROP);
        }
        for actor in &self.actors {
            if frame_index < actor.enter || frame_index >= actor.exit {
                continue;
            }
            let (x, y) = actor.position(frame_index);
            paint_square(&mut frame, x, y, actor.size, actor.complexion);
        }
        frame
    }
}

fn paint_square(frame: &mut RgbFrame, x: f32, y: f32, size: u32, color: [u8; 3]) {
    let x0 = x.max(0.0) as u32;
    let y0 = y.max(0.0) as u32;
    let x1 = (x0 + size).min(frame.width);
    let y1 = (y0 + size).min(frame.height);
    for row in y0..y1 {
        for col in x0..x1 {
            let i = ((row * frame.width + col) * 3) as usize;
            frame.data[i..i + 3].copy_from_slice(&color);
        }
    }
}

/// Fixed-length stream of rendered scene frames.
pub struct SimFrameSource {
    scene: Scene,
    frame_index: u64,
    total_frames: u64,
}

impl SimFrameSource {
    pub fn new(scene: Scene, total_frames: u64) -> Self {
        Self {
            scene,
            frame_index: 0,
            total_frames,
        }
    }
}

impl FrameSource for SimFrameSource {
    fn next_frame(&mut self) -> Result<Option<RgbFrame>> {
        if self.frame_index >= self.total_frames {
            return Ok(None);
        }
        let frame = self.scene.render(self.frame_index);
        self.frame_index += 1;
        Ok(Some(frame))
    }
}

// ── Detector ─────────────────────────────────────────────────────────────────

/// Finds face-colored pixel blobs by segmenting runs of occupied columns.
pub struct SimDetector {
    min_confidence: f32,
}

impl SimDetector {
    pub fn new(min_confidence: f32) -> Self {
        Self { min_confidence }
    }
}

impl FaceDetector for SimDetector {
    fn detect(&mut self, frame: &RgbFrame) -> Result<Vec<BBox>> {
        let w = frame.width as usize;
        let h = frame.height as usize;

        let mut column_hits = vec![0u32; w];
        for y in 0..h {
            let row = y * w * 3;
            for x in 0..w {
                let i = row + x * 3;
                if is_face_color(frame.data[i], frame.data[i + 1], frame.data[i + 2]) {
                    column_hits[x] += 1;
                }
            }
        }

        let mut boxes = Vec::new();
        let mut x = 0;
        while x < w {
            if column_hits[x] == 0 {
                x += 1;
                continue;
            }
            let start = x;
            while x < w && column_hits[x] > 0 {
                x += 1;
            }
            let end = x;

            let mut y_min = h;
            let mut y_max = 0usize;
            let mut hits = 0u32;
            for y in 0..h {
                let row = y * w * 3;
                for col in start..end {
                    let i = row + col * 3;
                    if is_face_color(frame.data[i], frame.data[i + 1], frame.data[i + 2]) {
                        hits += 1;
                        y_min = y_min.min(y);
                        y_max = y_max.max(y);
                    }
                }
            }
            if hits == 0 {
                continue;
            }

            let bw = (end - start) as f32;
            let bh = (y_max + 1 - y_min) as f32;
            let confidence = hits as f32 / (bw * bh);
            if confidence >= self.min_confidence {
                boxes.push(BBox {
                    x1: start as f32,
                    y1: y_min as f32,
                    x2: end as f32,
                    y2: (y_max + 1) as f32,
                    confidence,
                });
            }
        }

        Ok(boxes)
    }
}

// ── Tracker ──────────────────────────────────────────────────────────────────

struct LiveTrack {
    id: TrackId,
    bbox: BBox,
    hits: u32,
    misses: u32,
}

/// Nearest-center association with a confirmation streak and a miss budget.
/// Good enough for rigid, slow-moving stand-ins; coasting tracks keep their
/// last box until the budget runs out.
pub struct SimTracker {
    next_id: TrackId,
    tracks: Vec<LiveTrack>,
    max_age: u32,
}

impl SimTracker {
    pub fn new(max_age: u32) -> Self {
        Self {
            next_id: 1,
            tracks: Vec::new(),
            max_age,
        }
    }
}

impl SubjectTracker for SimTracker {
    fn update(&mut self, detections: &[BBox], _frame: &RgbFrame) -> Result<Vec<TrackedFace>> {
        let mut claimed = vec![false; detections.len()];

        for track in &mut self.tracks {
            let (tx, ty) = (track.bbox.center_x(), track.bbox.center_y());
            let mut best: Option<(usize, f32)> = None;
            for (i, det) in detections.iter().enumerate() {
                if claimed[i] {
                    continue;
                }
                let dx = det.center_x() - tx;
                let dy = det.center_y() - ty;
                let dist = (dx * dx + dy * dy).sqrt();
                if dist <= MATCH_RADIUS && best.is_none_or(|(_, d)| dist < d) {
                    best = Some((i, dist));
                }
            }
            match best {
                Some((i, _)) => {
                    claimed[i] = true;
                    track.bbox = detections[i];
                    track.hits += 1;
                    track.misses = 0;
                }
                None => track.misses += 1,
            }
        }

        let max_age = self.max_age;
        self.tracks.retain(|track| track.misses <= max_age);

        for (i, det) in detections.iter().enumerate() {
            if claimed[i] {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            debug!(track_id = id, "sim tracker opened track");
            self.tracks.push(LiveTrack {
                id,
                bbox: *det,
                hits: 1,
                misses: 0,
            });
        }

        Ok(self
            .tracks
            .iter()
            .map(|track| TrackedFace {
                id: track.id,
                bbox: track.bbox,
                confirmed: track.hits >= CONFIRM_HITS,
            })
            .collect())
    }
}

// ── Embedder and analyzer ────────────────────────────────────────────────────

/// Mean color of the face-colored pixels in a crop, ignoring backdrop and
/// margin spill.
fn mean_face_color(image: &RgbImage) -> Option<[f32; 3]> {
    let mut sum = [0.0f64; 3];
    let mut count = 0u64;
    for px in image.pixels() {
        if is_face_color(px[0], px[1], px[2]) {
            sum[0] += px[0] as f64;
            sum[1] += px[1] as f64;
            sum[2] += px[2] as f64;
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }
    Some([
        (sum[0] / count as f64) as f32,
        (sum[1] / count as f64) as f32,
        (sum[2] / count as f64) as f32,
    ])
}

fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-10);
    for x in v.iter_mut() {
        *x /= norm;
    }
}

/// Deterministic pseudo-embedding built from harmonics of the mean color,
/// so equal complexions give identical fingerprints.
fn color_signature(mean: [f32; 3], dim: usize) -> Vec<f32> {
    let mut v = Vec::with_capacity(dim);
    for k in 0..dim {
        let channel = mean[k % 3] / 255.0;
        let harmonic = (k / 3 + 1) as f32;
        v.push((channel * harmonic * std::f32::consts::PI + (k % 3) as f32).sin());
    }
    l2_normalize(&mut v);
    v
}

pub struct SimEmbedder {
    dim: usize,
}

impl SimEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl FaceEmbedder for SimEmbedder {
    fn embed(&self, image: &RgbImage) -> Result<Vec<f32>> {
        let Some(mean) = mean_face_color(image) else {
            bail!("no face pixels in crop");
        };
        Ok(color_signature(mean, self.dim))
    }
}

/// Deterministic demographics derived from the mean complexion.
pub struct SimAnalyzer;

impl FaceAnalyzer for SimAnalyzer {
    fn analyze(&self, image: &RgbImage) -> Result<Demographics> {
        let Some(mean) = mean_face_color(image) else {
            bail!("no face pixels in crop");
        };
        let r = mean[0] as u32;
        let g = mean[1] as u32;
        let b = mean[2] as u32;
        Ok(Demographics {
            age: 18 + (r + g) % 40,
            gender: if (r + b) % 2 == 0 { "Man" } else { "Woman" }.to_string(),
            ethnicity: ETHNICITY_LABELS[((r + g + b) % 6) as usize].to_string(),
        })
    }
}

// ── Servo link and frame sink ────────────────────────────────────────────────

/// Logs servo traffic instead of driving a bus.
pub struct ConsoleServoLink;

impl ServoLink for ConsoleServoLink {
    fn open(&mut self) -> Result<()> {
        info!("servo link running in console mode");
        Ok(())
    }

    fn write_position(&mut self, pan: i32, tilt: i32, speed: u16, accel: u8) -> Result<()> {
        debug!(pan, tilt, speed, accel, "servo write");
        Ok(())
    }
}

/// Saves every Nth annotated frame as a numbered PNG.
pub struct SnapshotSink {
    dir: PathBuf,
    every: u64,
    delivered: u64,
}

impl SnapshotSink {
    pub fn new(dir: PathBuf, every: u64) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create snapshot dir {}", dir.display()))?;
        Ok(Self {
            dir,
            every: every.max(1),
            delivered: 0,
        })
    }
}

impl FrameSink for SnapshotSink {
    fn deliver(&mut self, frame: &RgbFrame) -> Result<()> {
        let n = self.delivered;
        self.delivered += 1;
        if n % self.every != 0 {
            return Ok(());
        }

        let img: RgbImage =
            ImageBuffer::from_raw(frame.width, frame.height, frame.data.clone())
                .context("invalid frame buffer")?;
        let path = self.dir.join(format!("frame_{n:05}.png"));
        img.save(&path)
            .with_context(|| format!("failed to save snapshot {}", path.display()))?;
        Ok(())
    }
}
