#![cfg(feature = "camera-v4l2")]

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use ouroboros::self_referencing;

use super::{decode_jpeg, CameraConfig, FrameSource};

/// Local V4L2 device. Asks for MJPEG at the configured size and falls back to
/// packed RGB when the driver refuses.
pub struct V4l2Source {
    config: CameraConfig,
    state: Option<DeviceState>,
    fourcc: [u8; 4],
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            fourcc: *b"MJPG",
        }
    }
}

impl FrameSource for V4l2Source {
    fn describe(&self) -> String {
        format!(
            "{} (v4l2 {}x{} {})",
            self.config.device,
            self.active_width,
            self.active_height,
            String::from_utf8_lossy(&self.fourcc)
        )
    }

    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"MJPG");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "v4l2: MJPG not accepted on {}: {}; trying RGB3",
                    self.config.device,
                    err
                );
                format.fourcc = v4l::FourCC::new(b"RGB3");
                device
                    .set_format(&format)
                    .context("set v4l2 RGB3 format")?
            }
        };

        self.active_width = format.width;
        self.active_height = format.height;
        self.fourcc = format.fourcc.repr;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 2)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<RgbImage> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let bytes = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .context("capture v4l2 frame")?;

        match &self.fourcc {
            b"MJPG" => decode_jpeg(&bytes),
            b"RGB3" => {
                let expected = (self.active_width as usize) * (self.active_height as usize) * 3;
                if bytes.len() < expected {
                    return Err(anyhow!(
                        "RGB frame length mismatch: expected {}, got {}",
                        expected,
                        bytes.len()
                    ));
                }
                RgbImage::from_raw(
                    self.active_width,
                    self.active_height,
                    bytes[..expected].to_vec(),
                )
                .ok_or_else(|| anyhow!("RGB frame does not fit {}x{}", self.active_width, self.active_height))
            }
            other => Err(anyhow!(
                "unsupported v4l2 pixel format {}",
                String::from_utf8_lossy(other)
            )),
        }
    }
}
