use anyhow::Result;

use crate::camera::Frame;
use crate::detect::result::DetectionResult;

/// Vision model backend.
///
/// A backend is loaded from one artifact path and may be dropped after a
/// single run; the agent reloads on every scheduled run.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run inference on a frame. Returned boxes are in frame pixel coordinates.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectionResult>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
