/// Axis-aligned box in frame pixel coordinates (top-left origin).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    /// Intersection over union with `other`; 0 when either box is empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.w).min(other.x + other.w);
        let y2 = (self.y + self.h).min(other.y + other.h);
        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One labeled detection from a single inference call.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionResult {
    /// Raw model label, e.g. `healthy_basil`.
    pub label: String,
    pub confidence: f32,
    pub bounding_box: BoundingBox,
}

/// Greedy per-label non-maximum suppression.
///
/// Output is ordered by descending confidence.
pub fn suppress_overlaps(mut detections: Vec<DetectionResult>, iou_threshold: f32) -> Vec<DetectionResult> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut kept: Vec<DetectionResult> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let overlaps = kept.iter().any(|k| {
            k.label == candidate.label && k.bounding_box.iou(&candidate.bounding_box) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}
