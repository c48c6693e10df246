//! Annotated JPEG snapshots
//!
//! Draws detection rectangles on a copy of the frame's pixels and writes a
//! compressed still image named `{camera_id}_{YYYYMMDD_HHMMSS}.jpg`.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use tracing::info;

use crate::detect::Detection;
use crate::error::{VigilError, VigilResult};
use crate::frame::Frame;

/// Box colors in BGR, indexed by `class_id % len`
const PALETTE: [[u8; 3]; 6] = [
    [0, 255, 0],   // green
    [0, 0, 255],   // red
    [255, 0, 0],   // blue
    [0, 255, 255], // yellow
    [255, 0, 255], // magenta
    [255, 255, 0], // cyan
];

const BOX_THICKNESS: i64 = 2;

const JPEG_QUALITY: u8 = 90;

/// Draw 2-pixel rectangles for each detection onto BGR pixel data in place
pub fn draw_bounding_boxes(
    pixels: &mut [u8],
    width: u32,
    height: u32,
    stride: usize,
    detections: &[Detection],
) {
    let w = width as i64;
    let h = height as i64;

    let mut put = |x: i64, y: i64, color: &[u8; 3]| {
        if x < 0 || y < 0 || x >= w || y >= h {
            return;
        }
        let idx = y as usize * stride + x as usize * 3;
        pixels[idx] = color[0];
        pixels[idx + 1] = color[1];
        pixels[idx + 2] = color[2];
    };

    for det in detections {
        let x1 = (det.x1 as i64).max(0);
        let y1 = (det.y1 as i64).max(0);
        let x2 = (det.x2 as i64).min(w - 1);
        let y2 = (det.y2 as i64).min(h - 1);
        let color = &PALETTE[det.class_id.rem_euclid(PALETTE.len() as i32) as usize];

        for t in 0..BOX_THICKNESS {
            for x in x1..=x2 {
                put(x, y1 + t, color);
                put(x, y2 - t, color);
            }
            for y in y1..=y2 {
                put(x1 + t, y, color);
                put(x2 - t, y, color);
            }
        }
    }
}

/// Write an annotated snapshot. The frame's pixels are never mutated; the
/// rectangles are drawn on a deep copy. Returns the full path on success.
pub fn save(
    frame: &Frame,
    detections: &[Detection],
    camera_id: &str,
    dir: &Path,
) -> VigilResult<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let file_path = dir.join(format!("{}_{}.jpg", camera_id, stamp));

    let mut pixels = frame.pixels.clone();
    if !detections.is_empty() {
        draw_bounding_boxes(&mut pixels, frame.width, frame.height, frame.stride, detections);
    }

    // Repack to tight rows and swap BGR to the encoder's RGB.
    let width = frame.width as usize;
    let height = frame.height as usize;
    let mut rgb = Vec::with_capacity(width * height * 3);
    for row in 0..height {
        let start = row * frame.stride;
        for col in 0..width {
            let px = start + col * 3;
            rgb.push(pixels[px + 2]);
            rgb.push(pixels[px + 1]);
            rgb.push(pixels[px]);
        }
    }

    let file = File::create(&file_path)?;
    let mut writer = BufWriter::new(file);
    let mut encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
    encoder
        .encode(&rgb, frame.width, frame.height, ExtendedColorType::Rgb8)
        .map_err(|e| VigilError::Snapshot(e.to_string()))?;

    info!("Snapshot saved: {}", file_path.display());
    Ok(file_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32) -> Frame {
        let mut frame = Frame::empty();
        frame.resize(width, height);
        frame
    }

    fn detection(class_id: i32, x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection {
            class_id,
            class_name: "person".to_string(),
            confidence: 0.9,
            x1,
            y1,
            x2,
            y2,
        }
    }

    #[test]
    fn test_draw_marks_edges_not_interior() {
        let f = frame(20, 20);
        let mut pixels = f.pixels.clone();
        draw_bounding_boxes(
            &mut pixels,
            20,
            20,
            f.stride,
            &[detection(0, 5.0, 5.0, 15.0, 15.0)],
        );

        // Top edge painted green (BGR 0,255,0)
        let edge = 5 * f.stride + 5 * 3;
        assert_eq!(&pixels[edge..edge + 3], &[0, 255, 0]);

        // Interior untouched
        let interior = 10 * f.stride + 10 * 3;
        assert_eq!(&pixels[interior..interior + 3], &[0, 0, 0]);
    }

    #[test]
    fn test_draw_clips_out_of_bounds_box() {
        let f = frame(10, 10);
        let mut pixels = f.pixels.clone();
        draw_bounding_boxes(
            &mut pixels,
            10,
            10,
            f.stride,
            &[detection(1, -5.0, -5.0, 50.0, 50.0)],
        );
        // No panic; corner pixel painted red (class 1).
        assert_eq!(&pixels[0..3], &[0, 0, 255]);
    }

    #[test]
    fn test_save_writes_jpeg_and_preserves_input() {
        let dir = tempfile::tempdir().unwrap();
        let f = frame(32, 24);
        let before = f.pixels.clone();

        let path = save(&f, &[detection(0, 2.0, 2.0, 20.0, 20.0)], "cam1", dir.path()).unwrap();

        assert!(path.exists());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("cam1_"));
        assert!(name.ends_with(".jpg"));
        let bytes = std::fs::read(&path).unwrap();
        // JPEG SOI marker
        assert_eq!(&bytes[0..2], &[0xFF, 0xD8]);
        // Input frame untouched
        assert_eq!(f.pixels, before);
    }
}
