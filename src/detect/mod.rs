//! Plant detection: load the model named by the resolved deployment, run it on
//! a frame, and project the labels into species and health views.

mod backend;
mod backends;
mod result;
mod views;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{suppress_overlaps, BoundingBox, DetectionResult};
pub use views::{
    partition, split_label, HealthEntry, HealthStatus, HealthView, LabelRules, SpeciesView,
};

use std::path::Path;

use anyhow::anyhow;

use crate::camera::Frame;
use crate::error::AgentError;

/// Detector tuning.
#[derive(Clone, Debug)]
pub struct DetectorSettings {
    /// Minimum confidence for a detection to count.
    pub confidence_threshold: f32,
    /// Overlap above which same-label boxes are merged.
    pub iou_threshold: f32,
    /// Square model input side in pixels.
    pub input_size: u32,
    /// Class names by index. Empty means read `<model>.names` next to the artifact.
    pub class_names: Vec<String>,
    pub label_rules: LabelRules,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            input_size: 640,
            class_names: Vec::new(),
            label_rules: LabelRules::default(),
        }
    }
}

/// Everything one inference pass produced.
#[derive(Clone, Debug)]
pub struct DetectionOutcome {
    /// Detections that passed the confidence threshold, labels normalized.
    pub detections: Vec<DetectionResult>,
    pub species: SpeciesView,
    pub health: HealthView,
}

pub struct Detector {
    settings: DetectorSettings,
}

impl Detector {
    pub fn new(settings: DetectorSettings) -> Self {
        Self { settings }
    }

    /// Species and health views for `frame` using the model at `model_artifact_path`.
    pub fn detect(
        &self,
        frame: &Frame,
        model_artifact_path: &str,
    ) -> Result<(SpeciesView, HealthView), AgentError> {
        let outcome = self.run(frame, model_artifact_path)?;
        Ok((outcome.species, outcome.health))
    }

    /// Like `detect`, keeping the individual detections.
    pub fn run(&self, frame: &Frame, model_artifact_path: &str) -> Result<DetectionOutcome, AgentError> {
        let mut backend = self.load(model_artifact_path)?;
        backend.warm_up().map_err(AgentError::Inference)?;
        let raw = backend.detect(frame).map_err(AgentError::Inference)?;
        log::info!(
            "{} backend: {} raw detections on frame #{}",
            backend.name(),
            raw.len(),
            frame.sequence()
        );

        let rules = &self.settings.label_rules;
        let detections: Vec<DetectionResult> = raw
            .into_iter()
            .filter(|d| d.confidence >= self.settings.confidence_threshold)
            .map(|d| DetectionResult {
                label: rules.normalize(&d.label),
                ..d
            })
            .collect();
        for (i, d) in detections.iter().enumerate() {
            log::info!("  [{}] {} (conf: {:.2})", i, d.label, d.confidence);
        }

        // Labels are normalized already; a second pass through the rules is a no-op.
        let (species, health) = partition(detections.iter().map(|d| d.label.as_str()), &LabelRules::none());
        Ok(DetectionOutcome {
            detections,
            species,
            health,
        })
    }

    fn load(&self, path: &str) -> Result<Box<dyn DetectorBackend>, AgentError> {
        let path = path.trim();
        if path.starts_with("stub://") {
            return StubBackend::from_path(path)
                .map(|b| Box::new(b) as Box<dyn DetectorBackend>)
                .map_err(AgentError::Inference);
        }
        if !Path::new(path).is_file() {
            return Err(AgentError::Inference(anyhow!(
                "model artifact {} does not exist",
                path
            )));
        }
        self.load_onnx(path)
    }

    #[cfg(feature = "backend-tract")]
    fn load_onnx(&self, path: &str) -> Result<Box<dyn DetectorBackend>, AgentError> {
        let class_names = if self.settings.class_names.is_empty() {
            read_class_names(Path::new(path))
        } else {
            self.settings.class_names.clone()
        };
        log::info!("loading model {} ({} classes)", path, class_names.len());
        let backend = TractBackend::new(path, self.settings.input_size, class_names)
            .map_err(AgentError::Inference)?
            .with_thresholds(self.settings.confidence_threshold, self.settings.iou_threshold);
        Ok(Box::new(backend))
    }

    #[cfg(not(feature = "backend-tract"))]
    fn load_onnx(&self, path: &str) -> Result<Box<dyn DetectorBackend>, AgentError> {
        Err(AgentError::Inference(anyhow!(
            "model {} requires the backend-tract feature",
            path
        )))
    }
}

/// Class names from a `<model>.names` sidecar, one per line.
#[cfg_attr(not(feature = "backend-tract"), allow(dead_code))]
fn read_class_names(model_path: &Path) -> Vec<String> {
    let sidecar = model_path.with_extension("names");
    match std::fs::read_to_string(&sidecar) {
        Ok(raw) => raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Err(err) => {
            log::warn!(
                "no class names for {} ({}: {}); labels fall back to class_<n>",
                model_path.display(),
                sidecar.display(),
                err
            );
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn frame() -> Frame {
        Frame::new(RgbImage::new(64, 48), 7)
    }

    #[test]
    fn detects_species_and_health_from_stub_model() {
        let detector = Detector::new(DetectorSettings::default());
        let (species, health) = detector
            .detect(&frame(), "stub://healthy_basil,healthy_basil,unhealthy_poinsenttia")
            .unwrap();
        assert_eq!(species.iter().collect::<Vec<_>>(), vec!["basil", "poinsettia"]);
        assert_eq!(health.len(), 3);
        assert_eq!(health.entries()[2].label(), "unhealthy_poinsettia");
    }

    #[test]
    fn low_confidence_detections_are_dropped() {
        let detector = Detector::new(DetectorSettings::default());
        let outcome = detector
            .run(&frame(), "stub://healthy_basil:0.95,unhealthy_basil:0.2")
            .unwrap();
        assert_eq!(outcome.detections.len(), 1);
        assert_eq!(outcome.health.len(), 1);
    }

    #[test]
    fn missing_artifact_is_inference_error() {
        let detector = Detector::new(DetectorSettings::default());
        let err = detector
            .detect(&frame(), "/nonexistent/models/last.onnx")
            .unwrap_err();
        assert!(matches!(err, AgentError::Inference(_)));
    }

    #[test]
    fn reads_sidecar_class_names() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("last.onnx");
        std::fs::write(dir.path().join("last.names"), "healthy_basil\n\nunhealthy_basil\n").unwrap();
        assert_eq!(read_class_names(&model), vec!["healthy_basil", "unhealthy_basil"]);
        assert!(read_class_names(&dir.path().join("other.onnx")).is_empty());
    }
}
