use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::camera::CameraConfig;
use crate::detect::{DetectorSettings, LabelRules};
use crate::report::ReportPaths;
use crate::store::StoreConfig;
use crate::stream::StreamConfig;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_ORIGIN: &str = "SRaspberryPi_AI";
const DEFAULT_CSE: &str = "TinyIoT";
const DEFAULT_AE: &str = "TinyFarm";
const DEFAULT_DEPLOYMENT: &str = "modelDeploy_healthy";
const DEFAULT_CHECK_INTERVAL_SECS: u64 = 600;
const DEFAULT_CAMERA_DEVICE: &str = "stub://minifarm";
const DEFAULT_CAMERA_WIDTH: u32 = 1920;
const DEFAULT_CAMERA_HEIGHT: u32 = 1440;
const DEFAULT_STREAM_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_STREAM_WIDTH: u32 = 640;
const DEFAULT_STREAM_HEIGHT: u32 = 480;
const DEFAULT_STREAM_FPS: u32 = 10;
const DEFAULT_STREAM_QUALITY: u8 = 80;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AgentConfigFile {
    store: Option<StoreConfigFile>,
    resources: Option<ResourcesConfigFile>,
    schedule: Option<ScheduleConfigFile>,
    camera: Option<CameraConfigFile>,
    stream: Option<StreamConfigFile>,
    detector: Option<DetectorConfigFile>,
    archive: Option<ArchiveConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StoreConfigFile {
    base_url: Option<String>,
    origin: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ResourcesConfigFile {
    cse: Option<String>,
    ae: Option<String>,
    deployment_path: Option<String>,
    species_path: Option<String>,
    health_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ScheduleConfigFile {
    trigger_hours: Option<Vec<u32>>,
    check_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StreamConfigFile {
    enabled: Option<bool>,
    addr: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    input_size: Option<u32>,
    class_names: Option<Vec<String>>,
    label_corrections: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ArchiveConfigFile {
    capture_dir: Option<PathBuf>,
}

/// Complete agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub store: StoreConfig,
    pub cse: String,
    pub ae: String,
    pub deployment_path: String,
    pub report: ReportPaths,
    /// Sorted, deduplicated hours of day (0-23).
    pub trigger_hours: Vec<u32>,
    pub check_interval: Duration,
    pub camera: CameraConfig,
    pub stream_enabled: bool,
    pub stream: StreamConfig,
    pub detector: DetectorSettings,
    /// Where raw and annotated captures go. `None` disables the archive.
    pub capture_dir: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from_file(AgentConfigFile::default())
    }
}

impl AgentConfig {
    /// Read `path` (if any), then apply `MINIFARM_*` overrides, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => AgentConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse TOML text without consulting the environment.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let file: AgentConfigFile =
            toml::from_str(raw).map_err(|e| anyhow!("invalid config: {}", e))?;
        let mut cfg = Self::from_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AgentConfigFile) -> Self {
        let store_file = file.store.unwrap_or_default();
        let store = StoreConfig {
            base_url: store_file
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            origin: store_file
                .origin
                .unwrap_or_else(|| DEFAULT_ORIGIN.to_string()),
            timeout: store_file.timeout_secs.map(Duration::from_secs),
        };

        let resources = file.resources.unwrap_or_default();
        let cse = resources.cse.unwrap_or_else(|| DEFAULT_CSE.to_string());
        let ae = resources.ae.unwrap_or_else(|| DEFAULT_AE.to_string());
        let deployment_path = resources.deployment_path.unwrap_or_else(|| {
            format!("/{}/{}/modelDeploymentList/{}", cse, ae, DEFAULT_DEPLOYMENT)
        });
        let report = ReportPaths {
            species: resources
                .species_path
                .unwrap_or_else(|| format!("/{}/{}/inference/species", cse, ae)),
            health: resources
                .health_path
                .unwrap_or_else(|| format!("/{}/{}/inference/health", cse, ae)),
        };

        let schedule = file.schedule.unwrap_or_default();
        let trigger_hours = schedule
            .trigger_hours
            .unwrap_or_else(|| (0..24).collect());
        let check_interval = Duration::from_secs(
            schedule
                .check_interval_secs
                .unwrap_or(DEFAULT_CHECK_INTERVAL_SECS),
        );

        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraConfig {
            device: camera_file
                .device
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            width: camera_file.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
        };

        let stream_file = file.stream.unwrap_or_default();
        let stream_enabled = stream_file.enabled.unwrap_or(true);
        let stream = StreamConfig {
            addr: stream_file
                .addr
                .unwrap_or_else(|| DEFAULT_STREAM_ADDR.to_string()),
            width: stream_file.width.unwrap_or(DEFAULT_STREAM_WIDTH),
            height: stream_file.height.unwrap_or(DEFAULT_STREAM_HEIGHT),
            fps: stream_file.fps.unwrap_or(DEFAULT_STREAM_FPS),
            jpeg_quality: stream_file.jpeg_quality.unwrap_or(DEFAULT_STREAM_QUALITY),
        };

        let detector_file = file.detector.unwrap_or_default();
        let defaults = DetectorSettings::default();
        let label_rules = match detector_file.label_corrections {
            Some(table) => LabelRules::new(table.into_iter().collect()),
            None => LabelRules::default(),
        };
        let detector = DetectorSettings {
            confidence_threshold: detector_file
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            iou_threshold: detector_file
                .iou_threshold
                .unwrap_or(defaults.iou_threshold),
            input_size: detector_file.input_size.unwrap_or(defaults.input_size),
            class_names: detector_file.class_names.unwrap_or_default(),
            label_rules,
        };

        Self {
            store,
            cse,
            ae,
            deployment_path,
            report,
            trigger_hours,
            check_interval,
            camera,
            stream_enabled,
            stream,
            detector,
            capture_dir: file.archive.and_then(|archive| archive.capture_dir),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_value("MINIFARM_BASE_URL") {
            self.store.base_url = url;
        }
        if let Some(origin) = env_value("MINIFARM_ORIGIN") {
            self.store.origin = origin;
        }
        if let Some(hours) = env_value("MINIFARM_TRIGGER_HOURS") {
            self.trigger_hours = split_csv(&hours)
                .iter()
                .map(|h| {
                    h.parse::<u32>().map_err(|_| {
                        anyhow!("MINIFARM_TRIGGER_HOURS must be a comma-separated list of hours")
                    })
                })
                .collect::<Result<_>>()?;
        }
        if let Some(interval) = env_value("MINIFARM_CHECK_INTERVAL_SECS") {
            let seconds: u64 = interval.parse().map_err(|_| {
                anyhow!("MINIFARM_CHECK_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.check_interval = Duration::from_secs(seconds);
        }
        if let Some(path) = env_value("MINIFARM_DEPLOYMENT_PATH") {
            self.deployment_path = path;
        }
        if let Some(device) = env_value("MINIFARM_CAMERA") {
            self.camera.device = device;
        }
        if let Some(addr) = env_value("MINIFARM_STREAM_ADDR") {
            self.stream.addr = addr;
        }
        if let Some(dir) = env_value("MINIFARM_CAPTURE_DIR") {
            self.capture_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let base = url::Url::parse(&self.store.base_url)
            .map_err(|e| anyhow!("invalid CSE base url '{}': {}", self.store.base_url, e))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(anyhow!("CSE base url must be http or https"));
        }
        if self.store.origin.trim().is_empty() {
            return Err(anyhow!("originator must not be empty"));
        }
        if self.store.timeout == Some(Duration::ZERO) {
            return Err(anyhow!("store timeout must be greater than zero"));
        }
        if self.deployment_path.trim_matches('/').is_empty() {
            return Err(anyhow!("deployment path must not be empty"));
        }

        if let Some(hour) = self.trigger_hours.iter().find(|h| **h > 23) {
            return Err(anyhow!("trigger hour {} is outside 0-23", hour));
        }
        self.trigger_hours.sort_unstable();
        self.trigger_hours.dedup();
        if self.trigger_hours.is_empty() {
            return Err(anyhow!("at least one trigger hour is required"));
        }
        if self.check_interval.is_zero() {
            return Err(anyhow!("check interval must be greater than zero"));
        }

        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        if self.stream.width == 0 || self.stream.height == 0 {
            return Err(anyhow!("stream resolution must be non-zero"));
        }
        if self.stream.fps == 0 {
            return Err(anyhow!("stream fps must be greater than zero"));
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(anyhow!("stream jpeg_quality must be within 1-100"));
        }

        for (name, value) in [
            ("confidence_threshold", self.detector.confidence_threshold),
            ("iou_threshold", self.detector.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("detector {} must be within [0, 1]", name));
            }
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be non-zero"));
        }
        Ok(())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_config_file(path: &Path) -> Result<AgentConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
