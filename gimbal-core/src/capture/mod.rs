//! Capture gating and face-crop persistence.
//!
//! A crop is worth keeping only while the track still needs images and only
//! on every Nth frame; the saved region is the detected box padded by a
//! margin so downstream models see some context around the face.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::RgbImage;
use tracing::{debug, info};

use crate::config::CaptureConfig;
use crate::detection::{BBox, TrackId};
use crate::registry::TrackRecord;
use crate::video::RgbFrame;

/// Whether a crop should be persisted for `record` on this frame.
pub fn should_capture(record: &TrackRecord, frame_index: u64, config: &CaptureConfig) -> bool {
    record.images_saved < config.capture_limit && frame_index % config.frame_skip == 0
}

/// Path of the `index`-th crop of a track. Also how the resolver finds the
/// crops again, so the scheme changes in one place only.
pub fn crop_path(storage_path: &Path, track_id: TrackId, index: u32) -> PathBuf {
    storage_path.join(format!("face_{track_id}_{index}.png"))
}

/// Persist the face region of `bbox`, expanded by the configured margin and
/// clamped to the frame bounds. Returns `Ok(false)` without touching the
/// record when the clamped region is empty.
pub fn save_face_crop(
    frame: &RgbFrame,
    bbox: &BBox,
    record: &mut TrackRecord,
    config: &CaptureConfig,
) -> Result<bool> {
    let margin = config.crop_margin as f32;
    let x1 = (bbox.x1 - margin).max(0.0) as u32;
    let y1 = (bbox.y1 - margin).max(0.0) as u32;
    let x2 = (bbox.x2 + margin).clamp(0.0, frame.width as f32) as u32;
    let y2 = (bbox.y2 + margin).clamp(0.0, frame.height as f32) as u32;

    if x2 <= x1 || y2 <= y1 {
        debug!(track_id = record.track_id, "crop region empty after clamping; skipped");
        return Ok(false);
    }
    let (w, h) = (x2 - x1, y2 - y1);

    // Row-copy the region out of the packed RGB buffer.
    let src_stride = (frame.width * 3) as usize;
    let dst_stride = (w * 3) as usize;
    let mut crop = vec![0u8; dst_stride * h as usize];
    for row in 0..h as usize {
        let src_start = (y1 as usize + row) * src_stride + x1 as usize * 3;
        let dst_start = row * dst_stride;
        crop[dst_start..dst_start + dst_stride]
            .copy_from_slice(&frame.data[src_start..src_start + dst_stride]);
    }

    let img = RgbImage::from_raw(w, h, crop).context("crop buffer does not match its dimensions")?;

    std::fs::create_dir_all(&record.storage_path).with_context(|| {
        format!(
            "failed to create crop directory {}",
            record.storage_path.display()
        )
    })?;
    let path = crop_path(&record.storage_path, record.track_id, record.images_saved);
    img.save(&path)
        .with_context(|| format!("failed to save face crop {}", path.display()))?;

    record.images_saved += 1;
    info!(track_id = record.track_id, path = %path.display(), "saved face crop");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TrackRegistry;

    fn test_record(dir: &Path, track_id: TrackId) -> TrackRecord {
        let mut registry = TrackRegistry::new(dir);
        registry.get_or_create(track_id).clone()
    }

    fn gradient_frame(width: u32, height: u32) -> RgbFrame {
        let mut frame = RgbFrame::new(width, height);
        for y in 0..height as usize {
            for x in 0..width as usize {
                let offset = (y * width as usize + x) * 3;
                frame.data[offset] = x as u8;
                frame.data[offset + 1] = y as u8;
                frame.data[offset + 2] = 7;
            }
        }
        frame
    }

    fn config(limit: u32, skip: u64, margin: u32) -> CaptureConfig {
        CaptureConfig {
            capture_limit: limit,
            frame_skip: skip,
            crop_margin: margin,
        }
    }

    #[test]
    fn gate_requires_skip_interval_and_headroom() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = test_record(dir.path(), 1);
        let cfg = config(5, 2, 0);

        assert!(!should_capture(&record, 1, &cfg));
        assert!(should_capture(&record, 2, &cfg));
        assert!(should_capture(&record, 4, &cfg));

        record.images_saved = 5;
        assert!(!should_capture(&record, 4, &cfg));
    }

    #[test]
    fn crop_is_expanded_and_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = test_record(dir.path(), 1);
        let frame = gradient_frame(120, 90);
        let bbox = BBox {
            x1: 10.0,
            y1: 10.0,
            x2: 40.0,
            y2: 50.0,
            confidence: 0.9,
        };

        // Margin of 20 pushes the left/top edges against 0 and stays inside
        // on the right/bottom.
        let saved = save_face_crop(&frame, &bbox, &mut record, &config(5, 1, 20)).unwrap();
        assert!(saved);
        assert_eq!(record.images_saved, 1);

        let path = crop_path(&record.storage_path, 1, 0);
        let img = image::open(&path).unwrap().into_rgb8();
        assert_eq!(img.dimensions(), (60, 70));
        // Pixel (0, 0) of the crop is frame pixel (0, 0).
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 7]);
        // Pixel past the unclamped margin start maps back to frame coords.
        assert_eq!(img.get_pixel(15, 12).0, [15, 12, 7]);
    }

    #[test]
    fn degenerate_region_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = test_record(dir.path(), 2);
        let frame = gradient_frame(100, 80);
        // Entirely to the right of the frame.
        let bbox = BBox {
            x1: 150.0,
            y1: 10.0,
            x2: 180.0,
            y2: 40.0,
            confidence: 0.9,
        };

        let saved = save_face_crop(&frame, &bbox, &mut record, &config(5, 1, 0)).unwrap();
        assert!(!saved);
        assert_eq!(record.images_saved, 0);
        assert!(!record.storage_path.exists());
    }

    #[test]
    fn crop_filenames_follow_the_capture_counter() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = test_record(dir.path(), 9);
        let frame = gradient_frame(100, 80);
        let bbox = BBox {
            x1: 20.0,
            y1: 20.0,
            x2: 60.0,
            y2: 60.0,
            confidence: 0.9,
        };
        let cfg = config(5, 1, 0);

        save_face_crop(&frame, &bbox, &mut record, &cfg).unwrap();
        save_face_crop(&frame, &bbox, &mut record, &cfg).unwrap();

        assert!(crop_path(&record.storage_path, 9, 0).exists());
        assert!(crop_path(&record.storage_path, 9, 1).exists());
        assert!(!crop_path(&record.storage_path, 9, 2).exists());
        assert_eq!(record.images_saved, 2);
    }
}
