use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classify::ThresholdConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Where frames come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraSource {
    /// Local V4L2 webcam `/dev/video<device>`.
    #[default]
    Device,
    /// Network MJPEG stream at `url`.
    Mjpeg,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub source: CameraSource,
    /// V4L2 device index.
    #[serde(default)]
    pub device: u32,
    /// Requested capture size. The driver may pick the nearest it supports.
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// MJPEG stream URL (`multipart/x-mixed-replace` of JPEG parts).
    #[serde(default = "default_camera_url")]
    pub url: String,
    /// Flip frames horizontally so the stream behaves like a mirror.
    #[serde(default = "default_mirror")]
    pub mirror: bool,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_url")]
    pub url: String,
    #[serde(default = "default_detector_timeout_ms")]
    pub timeout_ms: u64,
    /// Landmarks reported with a lower visibility are treated as missing.
    #[serde(default)]
    pub min_visibility: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Pause between loop iterations. Only bounds CPU usage.
    #[serde(default = "default_loop_delay_ms")]
    pub loop_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: CameraSource::default(),
            device: 0,
            width: default_width(),
            height: default_height(),
            url: default_camera_url(),
            mirror: default_mirror(),
            read_timeout_ms: default_read_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            url: default_detector_url(),
            timeout_ms: default_detector_timeout_ms(),
            min_visibility: 0.0,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            loop_delay_ms: default_loop_delay_ms(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "stream.jpeg_quality must be within 1..=100, got {}",
                self.stream.jpeg_quality
            )));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "camera size must be non-zero, got {}x{}",
                self.camera.width, self.camera.height
            )));
        }
        if self.camera.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "camera.read_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.thresholds.min_head > self.thresholds.max_head {
            return Err(ConfigError::Invalid(format!(
                "thresholds.min_head ({}) is greater than thresholds.max_head ({})",
                self.thresholds.min_head, self.thresholds.max_head
            )));
        }
        if !(0.0..=1.0).contains(&self.detector.min_visibility) {
            return Err(ConfigError::Invalid(format!(
                "detector.min_visibility must be within 0..=1, got {}",
                self.detector.min_visibility
            )));
        }
        Ok(())
    }
}

impl CameraConfig {
    pub fn device_path(&self) -> PathBuf {
        PathBuf::from(format!("/dev/video{}", self.device))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl DetectorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl PipelineConfig {
    pub fn loop_delay(&self) -> Duration {
        Duration::from_millis(self.loop_delay_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}
fn default_camera_url() -> String {
    "http://127.0.0.1:8080/?action=stream".into()
}
fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_mirror() -> bool {
    true
}
fn default_read_timeout_ms() -> u64 {
    5000
}
fn default_retry_delay_ms() -> u64 {
    500
}
fn default_detector_url() -> String {
    "http://127.0.0.1:9000/pose".into()
}
fn default_detector_timeout_ms() -> u64 {
    2000
}
fn default_loop_delay_ms() -> u64 {
    10
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_log_level() -> String {
    "info".into()
}
