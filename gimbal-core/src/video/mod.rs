//! Frame type and the acquisition/observation boundaries.
//!
//! Capture devices and display live outside the crate. A [`FrameSource`]
//! hands the pipeline packed RGB24 frames; a [`FrameSink`] receives the
//! annotated frames back, for display, recording or snapshots.

use anyhow::Result;

/// A single video frame in packed RGB24, row-major.
pub struct RgbFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RgbFrame {
    /// Allocate a black frame.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: vec![0u8; (width * height * 3) as usize],
            width,
            height,
        }
    }

    /// Frame center on the integer pixel grid used by the feedback law.
    pub fn center(&self) -> (i32, i32) {
        ((self.width / 2) as i32, (self.height / 2) as i32)
    }
}

/// Produces decoded frames in stream order.
pub trait FrameSource {
    /// Next frame, or `Ok(None)` once the stream ends.
    fn next_frame(&mut self) -> Result<Option<RgbFrame>>;
}

/// Receives each processed (annotated) frame.
pub trait FrameSink {
    fn deliver(&mut self, frame: &RgbFrame) -> Result<()>;
}
