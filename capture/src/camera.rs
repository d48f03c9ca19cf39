use std::future::Future;

use bytes::Bytes;
use image::{ImageFormat, RgbImage};
use posture_common::config::{CameraConfig, CameraSource};
use tracing::info;

use crate::mjpeg::MjpegCamera;
#[cfg(target_os = "linux")]
use crate::webcam::V4l2Camera;

/// A decoded camera frame together with the JPEG it came from.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub seq: u64,
    pub captured_at_ms: i64,
    pub jpeg: Bytes,
    pub image: RgbImage,
}

/// Anything that yields camera frames.
///
/// Errors are per frame: the caller retries and the source is expected to
/// recover (e.g. by reconnecting) on a later call.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> impl Future<Output = Result<CapturedFrame, CaptureError>> + Send;

    /// Drops any half-read state after the caller gave up waiting on a frame.
    fn reset(&mut self) {}
}

/// The frame source picked by `[camera] source`.
pub enum Camera {
    Mjpeg(MjpegCamera),
    #[cfg(target_os = "linux")]
    Device(V4l2Camera),
}

impl Camera {
    pub fn from_config(config: &CameraConfig) -> Result<Self, CaptureError> {
        match config.source {
            CameraSource::Mjpeg => {
                info!(url = %config.url, "using MJPEG camera");
                Ok(Self::Mjpeg(MjpegCamera::new(&config.url)?))
            }
            #[cfg(target_os = "linux")]
            CameraSource::Device => {
                let device = config.device_path();
                info!(
                    device = %device.display(),
                    width = config.width,
                    height = config.height,
                    "using V4L2 webcam"
                );
                Ok(Self::Device(V4l2Camera::new(device, config.width, config.height)))
            }
            #[cfg(not(target_os = "linux"))]
            CameraSource::Device => Err(CaptureError::Unsupported(
                "local webcams need V4L2; use source = \"mjpeg\"".into(),
            )),
        }
    }
}

impl FrameSource for Camera {
    async fn next_frame(&mut self) -> Result<CapturedFrame, CaptureError> {
        match self {
            Self::Mjpeg(camera) => camera.next_frame().await,
            #[cfg(target_os = "linux")]
            Self::Device(camera) => camera.next_frame().await,
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Mjpeg(camera) => camera.reset(),
            #[cfg(target_os = "linux")]
            Self::Device(camera) => camera.reset(),
        }
    }
}

pub fn decode_jpeg(jpeg: &[u8]) -> Result<RgbImage, image::ImageError> {
    Ok(image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)?.to_rgb8())
}

/// Decodes `jpeg` off the async runtime.
pub(crate) async fn decode_frame(
    seq: u64,
    captured_at_ms: i64,
    jpeg: Bytes,
) -> Result<CapturedFrame, CaptureError> {
    let data = jpeg.clone();
    let image = tokio::task::spawn_blocking(move || decode_jpeg(&data)).await??;
    Ok(CapturedFrame {
        seq,
        captured_at_ms,
        jpeg,
        image,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("invalid camera URL {0}: {1}")]
    InvalidUrl(String, String),
    #[error("HTTP client setup failed: {0}")]
    Client(reqwest::Error),
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("camera stream ended")]
    StreamEnded,
    #[error("camera device error: {0}")]
    Device(#[from] std::io::Error),
    #[error("unsupported camera: {0}")]
    Unsupported(String),
    #[error("failed to decode JPEG frame: {0}")]
    Decode(#[from] image::ImageError),
    #[error("decode task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
