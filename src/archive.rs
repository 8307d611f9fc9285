//! On-disk capture archive: the raw inference frame plus an annotated copy.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};

use crate::camera::{encode_jpeg, Frame};
use crate::detect::{split_label, DetectionResult};

const FILE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const BOX_THICKNESS: u32 = 3;
const HEALTHY: Rgb<u8> = Rgb([0, 255, 0]);
const NOT_HEALTHY: Rgb<u8> = Rgb([255, 0, 0]);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchivedCapture {
    pub raw: PathBuf,
    pub annotated: PathBuf,
}

#[derive(Clone, Debug)]
pub struct CaptureArchive {
    dir: PathBuf,
    quality: u8,
}

impl CaptureArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            quality: 95,
        }
    }

    /// Save with the current local time in the file names.
    pub fn save(&self, frame: &Frame, detections: &[DetectionResult]) -> Result<ArchivedCapture> {
        let stamp = chrono::Local::now().format(FILE_STAMP_FORMAT).to_string();
        self.save_as(frame, detections, &stamp)
    }

    pub fn save_as(
        &self,
        frame: &Frame,
        detections: &[DetectionResult],
        stamp: &str,
    ) -> Result<ArchivedCapture> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create capture dir {}", self.dir.display()))?;

        let raw = self.dir.join(format!("raw_{}.jpg", stamp));
        write_jpeg(&raw, frame.image(), self.quality)?;

        let annotated = self.dir.join(format!("detection_{}.jpg", stamp));
        write_jpeg(&annotated, &annotate(frame.image(), detections), self.quality)?;

        log::info!("capture saved: {} / {}", raw.display(), annotated.display());
        Ok(ArchivedCapture { raw, annotated })
    }
}

fn write_jpeg(path: &Path, image: &RgbImage, quality: u8) -> Result<()> {
    let bytes = encode_jpeg(image, quality)?;
    std::fs::write(path, bytes).with_context(|| format!("write {}", path.display()))
}

/// Copy of `image` with a box outline per detection.
pub fn annotate(image: &RgbImage, detections: &[DetectionResult]) -> RgbImage {
    let mut out = image.clone();
    for detection in detections {
        let color = if split_label(&detection.label).health.is_healthy() {
            HEALTHY
        } else {
            NOT_HEALTHY
        };
        draw_outline(&mut out, detection, color);
    }
    out
}

fn draw_outline(image: &mut RgbImage, detection: &DetectionResult, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let b = &detection.bounding_box;
    let clamp = |v: f32, max: u32| (v.max(0.0) as u32).min(max - 1);
    let x1 = clamp(b.x, width);
    let y1 = clamp(b.y, height);
    let x2 = clamp(b.x + b.w, width);
    let y2 = clamp(b.y + b.h, height);
    if x2 < x1 || y2 < y1 {
        return;
    }
    for t in 0..BOX_THICKNESS {
        for x in x1..=x2 {
            put(image, x, y1 + t, color);
            put(image, x, y2.saturating_sub(t), color);
        }
        for y in y1..=y2 {
            put(image, x1 + t, y, color);
            put(image, x2.saturating_sub(t), y, color);
        }
    }
}

fn put(image: &mut RgbImage, x: u32, y: u32, color: Rgb<u8>) {
    if x < image.width() && y < image.height() {
        image.put_pixel(x, y, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn detection(label: &str, x: f32) -> DetectionResult {
        DetectionResult {
            label: label.to_string(),
            confidence: 0.9,
            bounding_box: BoundingBox {
                x,
                y: 10.0,
                w: 20.0,
                h: 20.0,
            },
        }
    }

    #[test]
    fn outlines_are_colored_by_health() {
        let image = RgbImage::new(100, 50);
        let out = annotate(
            &image,
            &[detection("healthy_basil", 5.0), detection("unhealthy_basil", 50.0)],
        );
        assert_eq!(*out.get_pixel(5, 10), HEALTHY);
        assert_eq!(*out.get_pixel(50, 10), NOT_HEALTHY);
        // Interior untouched.
        assert_eq!(*out.get_pixel(15, 20), Rgb([0, 0, 0]));
    }

    #[test]
    fn boxes_outside_the_frame_are_clamped() {
        let image = RgbImage::new(30, 30);
        let mut far = detection("healthy_basil", -40.0);
        far.bounding_box.w = 200.0;
        let out = annotate(&image, &[far]);
        assert_eq!(*out.get_pixel(0, 10), HEALTHY);
        assert_eq!(*out.get_pixel(29, 10), HEALTHY);
    }

    #[test]
    fn saves_raw_and_annotated_files() {
        let dir = tempfile::tempdir().unwrap();
        let archive = CaptureArchive::new(dir.path().join("captures"));
        let frame = Frame::new(RgbImage::new(40, 40), 1);
        let saved = archive
            .save_as(&frame, &[detection("healthy_basil", 1.0)], "20260501_130000")
            .unwrap();
        assert_eq!(saved.raw.file_name().unwrap(), "raw_20260501_130000.jpg");
        assert_eq!(
            saved.annotated.file_name().unwrap(),
            "detection_20260501_130000.jpg"
        );
        assert!(saved.raw.is_file() && saved.annotated.is_file());
    }
}
