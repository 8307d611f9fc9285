use anyhow::{anyhow, Result};
use image::RgbImage;

use super::{CameraConfig, FrameSource};

/// Synthetic source for `stub://` devices.
///
/// Produces a moving gradient so consecutive frames differ.
pub struct SyntheticSource {
    config: CameraConfig,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!(
            "{} (synthetic {}x{})",
            self.config.device, self.config.width, self.config.height
        )
    }

    fn connect(&mut self) -> Result<()> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(anyhow!("synthetic camera needs a non-zero frame size"));
        }
        Ok(())
    }

    fn next_frame(&mut self) -> Result<RgbImage> {
        self.frame_count += 1;
        let shift = self.frame_count;
        Ok(RgbImage::from_fn(
            self.config.width,
            self.config.height,
            |x, y| {
                let r = ((x as u64 + shift) % 256) as u8;
                let g = ((y as u64 + shift / 2) % 256) as u8;
                let b = (((x + y) as u64 / 2) % 256) as u8;
                image::Rgb([r, g, b])
            },
        ))
    }
}
