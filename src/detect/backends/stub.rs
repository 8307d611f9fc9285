use anyhow::{anyhow, Result};

use crate::camera::Frame;
use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, DetectionResult};

const DEFAULT_CONFIDENCE: f32 = 0.9;

/// Scripted backend for `stub://` model paths.
///
/// `stub://healthy_basil,unhealthy_poinsettia:0.4` reports each listed label once
/// per frame, with the optional `:confidence` suffix (default 0.9). Boxes are
/// laid out left to right across the frame. `stub://` alone detects nothing.
pub struct StubBackend {
    script: Vec<(String, f32)>,
}

impl StubBackend {
    pub fn from_path(path: &str) -> Result<Self> {
        let listing = path
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("stub model path must start with stub://"))?;
        let mut script = Vec::new();
        for item in listing.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (label, confidence) = match item.rsplit_once(':') {
                Some((label, conf)) => {
                    let conf: f32 = conf
                        .parse()
                        .map_err(|_| anyhow!("invalid stub confidence in '{}'", item))?;
                    (label, conf)
                }
                None => (item, DEFAULT_CONFIDENCE),
            };
            script.push((label.to_string(), confidence));
        }
        Ok(Self { script })
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectionResult>> {
        let slots = self.script.len().max(1) as f32;
        let slot_w = frame.width() as f32 / slots;
        let h = frame.height() as f32 / 2.0;
        Ok(self
            .script
            .iter()
            .enumerate()
            .map(|(i, (label, confidence))| DetectionResult {
                label: label.clone(),
                confidence: *confidence,
                bounding_box: BoundingBox {
                    x: i as f32 * slot_w,
                    y: h / 2.0,
                    w: slot_w,
                    h,
                },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn parses_labels_and_confidences() {
        let mut backend = StubBackend::from_path("stub://healthy_basil, unhealthy_basil:0.3").unwrap();
        let frame = Frame::new(RgbImage::new(100, 50), 1);
        let detections = backend.detect(&frame).unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].label, "healthy_basil");
        assert_eq!(detections[0].confidence, 0.9);
        assert_eq!(detections[1].confidence, 0.3);
        assert_eq!(detections[1].bounding_box.x, 50.0);
    }

    #[test]
    fn empty_script_detects_nothing() {
        let mut backend = StubBackend::from_path("stub://").unwrap();
        let frame = Frame::new(RgbImage::new(10, 10), 1);
        assert!(backend.detect(&frame).unwrap().is_empty());
    }

    #[test]
    fn rejects_bad_confidence() {
        assert!(StubBackend::from_path("stub://healthy_basil:high").is_err());
    }
}
