//! Capture, inference and annotation stages of the posture pipeline.

pub mod annotate;
pub mod camera;
pub mod detector;
pub mod draw;
pub mod mjpeg;
pub mod pipeline;
#[cfg(target_os = "linux")]
pub mod webcam;
