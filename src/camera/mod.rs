//! Camera sources.
//!
//! One physical camera is shared by the inference loop and the stream pump.
//! `Camera` serializes captures behind a mutex; a captured `Frame` is immutable
//! and cheap to clone.
//!
//! Sources, chosen by the configured device string:
//! - `stub://...` synthetic frames (tests, bench setups)
//! - `http(s)://...` JPEG snapshot endpoint
//! - `/dev/video*` V4L2 device (feature: camera-v4l2)
//! - anything else: a local JPEG still, re-read on every capture

mod file;
mod snapshot;
mod synthetic;
#[cfg(feature = "camera-v4l2")]
mod v4l2;

pub use file::StillImageSource;
pub use snapshot::SnapshotSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Source;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::RgbImage;

/// Camera settings.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device string, see module docs.
    pub device: String,
    /// Capture width (main stream, used for inference).
    pub width: u32,
    /// Capture height.
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "stub://minifarm".to_string(),
            width: 1920,
            height: 1440,
        }
    }
}

/// Anything that can produce RGB frames.
pub trait FrameSource: Send {
    /// Human-readable source description for logs.
    fn describe(&self) -> String;

    /// Open the underlying device. Called once before the first capture.
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Capture the next frame.
    fn next_frame(&mut self) -> Result<RgbImage>;
}

/// An immutable captured frame.
#[derive(Clone, Debug)]
pub struct Frame {
    image: Arc<RgbImage>,
    sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image: Arc::new(image),
            sequence,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Packed RGB8 pixels, row-major.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Capture sequence number, monotonically increasing per camera.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// A resized copy. Returns a clone of `self` when the size already matches.
    pub fn downscale(&self, width: u32, height: u32) -> Frame {
        if self.width() == width && self.height() == height {
            return self.clone();
        }
        let resized = image::imageops::resize(&*self.image, width, height, FilterType::Triangle);
        Frame::new(resized, self.sequence)
    }

    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        encode_jpeg(&self.image, quality)
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(64 * 1024);
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(image)
        .context("encode jpeg")?;
    Ok(out)
}

pub(crate) fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    Ok(image.into_rgb8())
}

/// Shared camera handle.
#[derive(Clone)]
pub struct Camera {
    source: Arc<Mutex<Box<dyn FrameSource>>>,
    captured: Arc<AtomicU64>,
    description: String,
}

impl Camera {
    /// Open the source named by `config.device` and connect it.
    pub fn open(config: &CameraConfig) -> Result<Self> {
        let source = open_source(config)?;
        Self::from_source(source)
    }

    pub fn from_source(mut source: Box<dyn FrameSource>) -> Result<Self> {
        source
            .connect()
            .with_context(|| format!("connect camera {}", source.describe()))?;
        let description = source.describe();
        log::info!("camera ready: {}", description);
        Ok(Self {
            source: Arc::new(Mutex::new(source)),
            captured: Arc::new(AtomicU64::new(0)),
            description,
        })
    }

    /// Capture one frame. Holds the camera lock for the duration of the capture only.
    pub fn capture(&self) -> Result<Frame> {
        let image = {
            let mut source = self
                .source
                .lock()
                .map_err(|_| anyhow!("camera lock poisoned"))?;
            source.next_frame()?
        };
        let sequence = self.captured.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Frame::new(image, sequence))
    }

    pub fn frames_captured(&self) -> u64 {
        self.captured.load(Ordering::SeqCst)
    }

    pub fn describe(&self) -> &str {
        &self.description
    }
}

fn open_source(config: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    let device = config.device.trim();
    if device.is_empty() {
        return Err(anyhow!("camera device must not be empty"));
    }
    if device.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config.clone())));
    }
    if device.starts_with("http://") || device.starts_with("https://") {
        return Ok(Box::new(SnapshotSource::new(device)?));
    }
    if device.starts_with("/dev/video") {
        #[cfg(feature = "camera-v4l2")]
        {
            return Ok(Box::new(V4l2Source::new(config.clone())));
        }
        #[cfg(not(feature = "camera-v4l2"))]
        {
            return Err(anyhow!(
                "camera {} requires the camera-v4l2 feature",
                device
            ));
        }
    }
    if device.contains("://") {
        return Err(anyhow!("unsupported camera scheme in '{}'", device));
    }
    Ok(Box::new(StillImageSource::new(device)))
}
