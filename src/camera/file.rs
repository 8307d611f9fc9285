use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

use super::{decode_jpeg, FrameSource};

/// Local JPEG still. The file is re-read on every capture so it can be
/// replaced by an external grabber between runs.
pub struct StillImageSource {
    path: PathBuf,
}

impl StillImageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FrameSource for StillImageSource {
    fn describe(&self) -> String {
        format!("{} (still image)", self.path.display())
    }

    fn connect(&mut self) -> Result<()> {
        if !self.path.is_file() {
            return Err(anyhow!("camera image {} does not exist", self.path.display()));
        }
        Ok(())
    }

    fn next_frame(&mut self) -> Result<RgbImage> {
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("read camera image {}", self.path.display()))?;
        decode_jpeg(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::encode_jpeg;

    #[test]
    fn reads_jpeg_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.jpg");
        let image = RgbImage::from_pixel(20, 10, image::Rgb([10, 200, 30]));
        std::fs::write(&path, encode_jpeg(&image, 90).unwrap()).unwrap();

        let mut source = StillImageSource::new(&path);
        source.connect().unwrap();
        assert_eq!(source.next_frame().unwrap().dimensions(), (20, 10));
    }

    #[test]
    fn missing_file_fails_connect() {
        let mut source = StillImageSource::new("/nonexistent/still.jpg");
        assert!(source.connect().is_err());
    }
}
