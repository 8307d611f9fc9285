use std::io::Read;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use url::Url;

use super::{decode_jpeg, FrameSource};

const MAX_JPEG_BYTES: u64 = 16 * 1024 * 1024;
/// Captures hold the camera lock, so a stalled endpoint must not block forever.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP(S) endpoint returning one JPEG per GET (typical for IP cameras and
/// ESP32-CAM `/capture`).
pub struct SnapshotSource {
    url: Url,
    agent: ureq::Agent,
}

impl SnapshotSource {
    pub fn new(url: &str) -> Result<Self> {
        Self::with_timeout(url, DEFAULT_TIMEOUT)
    }

    /// `timeout` bounds the whole request, connect through the last body byte.
    pub fn with_timeout(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url).context("parse camera snapshot url")?;
        Ok(Self {
            url,
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        })
    }
}

impl FrameSource for SnapshotSource {
    fn describe(&self) -> String {
        format!("{} (http snapshot)", self.url)
    }

    fn next_frame(&mut self) -> Result<RgbImage> {
        let response = self
            .agent
            .get(self.url.as_str())
            .call()
            .with_context(|| format!("fetch jpeg snapshot from {}", self.url))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES)
            .read_to_end(&mut bytes)
            .context("read jpeg snapshot")?;
        if bytes.is_empty() {
            return Err(anyhow!("empty jpeg snapshot from {}", self.url));
        }
        decode_jpeg(&bytes)
    }
}
