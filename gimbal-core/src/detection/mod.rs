//! Detection and tracking boundary types, plus observation overlays.
//!
//! The detection model and the tracker's association algorithm live outside
//! the crate; the pipeline consumes them through [`FaceDetector`] and
//! [`SubjectTracker`]. Boxes and track centers are always expressed in
//! original-frame pixel coordinates.

use anyhow::Result;
use image::{ImageBuffer, Rgb, RgbImage};
use imageproc::rect::Rect;

use crate::video::RgbFrame;

/// Stable identifier assigned by the external tracker.
pub type TrackId = u32;

// ── Boundary types ───────────────────────────────────────────────────────────

/// Axis-aligned bounding box in pixel coordinates of the original frame.
#[derive(Debug, Clone, Copy)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl BBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
    pub fn center_x(&self) -> f32 {
        (self.x1 + self.x2) / 2.0
    }
    pub fn center_y(&self) -> f32 {
        (self.y1 + self.y2) / 2.0
    }
    /// Center truncated onto the integer pixel grid of the feedback law.
    pub fn center(&self) -> (i32, i32) {
        (self.center_x() as i32, self.center_y() as i32)
    }
}

/// One tracked subject as reported by the external tracker for a frame.
#[derive(Debug, Clone, Copy)]
pub struct TrackedFace {
    pub id: TrackId,
    pub bbox: BBox,
    pub confirmed: bool,
}

impl TrackedFace {
    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }
    /// (left, top, right, bottom) in original-frame pixels.
    pub fn ltrb(&self) -> (f32, f32, f32, f32) {
        (self.bbox.x1, self.bbox.y1, self.bbox.x2, self.bbox.y2)
    }
}

// ── External collaborators ───────────────────────────────────────────────────

/// Face detection model.
pub trait FaceDetector {
    /// Detect faces in `frame`.
    fn detect(&mut self, frame: &RgbFrame) -> Result<Vec<BBox>>;
}

/// Multi-object tracker wrapping its own association state.
pub trait SubjectTracker {
    /// Associate `detections` with existing tracks and return the current
    /// track set, confirmed or not.
    fn update(&mut self, detections: &[BBox], frame: &RgbFrame) -> Result<Vec<TrackedFace>>;
}

// ── Observation overlays ─────────────────────────────────────────────────────

/// Draw hollow boxes for `tracks` onto the frame's RGB data in-place.
pub fn draw_tracks(frame: &mut RgbFrame, tracks: &[TrackedFace], color: [u8; 3]) {
    // Build the image from the existing buffer; no clone, we write back in-place.
    let mut img: RgbImage =
        ImageBuffer::from_raw(frame.width, frame.height, std::mem::take(&mut frame.data))
            .expect("valid frame dimensions");

    for track in tracks {
        let bbox = &track.bbox;
        let rect = Rect::at(bbox.x1 as i32, bbox.y1 as i32).of_size(
            bbox.width().max(1.0) as u32,
            bbox.height().max(1.0) as u32,
        );
        imageproc::drawing::draw_hollow_rect_mut(&mut img, rect, Rgb(color));
    }

    frame.data = img.into_raw();
}

/// Mark the frame center and the displacement to the steered subject.
pub fn draw_steering_overlay(frame: &mut RgbFrame, subject: (i32, i32), color: [u8; 3]) {
    let (fx, fy) = frame.center();
    let mut img: RgbImage =
        ImageBuffer::from_raw(frame.width, frame.height, std::mem::take(&mut frame.data))
            .expect("valid frame dimensions");

    imageproc::drawing::draw_cross_mut(&mut img, Rgb(color), fx, fy);
    imageproc::drawing::draw_line_segment_mut(
        &mut img,
        (fx as f32, fy as f32),
        (subject.0 as f32, subject.1 as f32),
        Rgb(color),
    );

    frame.data = img.into_raw();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32) -> BBox {
        BBox {
            x1,
            y1,
            x2,
            y2,
            confidence: 0.9,
        }
    }

    #[test]
    fn bbox_geometry() {
        let b = bbox(10.0, 20.0, 50.0, 100.0);
        assert_eq!(b.width(), 40.0);
        assert_eq!(b.height(), 80.0);
        assert_eq!(b.center(), (30, 60));
    }

    #[test]
    fn ltrb_matches_bbox_corners() {
        let track = TrackedFace {
            id: 3,
            bbox: bbox(1.0, 2.0, 3.0, 4.0),
            confirmed: true,
        };
        assert_eq!(track.ltrb(), (1.0, 2.0, 3.0, 4.0));
        assert!(track.is_confirmed());
    }

    #[test]
    fn draw_tracks_marks_pixels_without_resizing() {
        let mut frame = RgbFrame::new(64, 48);
        let tracks = [TrackedFace {
            id: 1,
            bbox: bbox(10.0, 10.0, 30.0, 30.0),
            confirmed: true,
        }];

        draw_tracks(&mut frame, &tracks, [0, 255, 0]);

        assert_eq!(frame.data.len(), 64 * 48 * 3);
        // Top-left corner of the hollow rect is on the box outline.
        let offset = (10 * 64 + 10) * 3;
        assert_eq!(&frame.data[offset..offset + 3], &[0, 255, 0]);
    }

    #[test]
    fn steering_overlay_marks_frame_center() {
        let mut frame = RgbFrame::new(64, 48);
        draw_steering_overlay(&mut frame, (10, 10), [0, 0, 255]);

        let (fx, fy) = (32usize, 24usize);
        let offset = (fy * 64 + fx) * 3;
        assert_eq!(&frame.data[offset..offset + 3], &[0, 0, 255]);
    }
}
