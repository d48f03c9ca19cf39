use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::Serialize;

use crate::classify::Classification;
use crate::geometry::PostureMetrics;

/// Multipart boundary used by the MJPEG stream.
pub const MJPEG_BOUNDARY: &str = "frame";

/// `Content-Type` of an MJPEG response.
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Metrics of a frame together with their pass/fail verdict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PostureReading {
    pub metrics: PostureMetrics,
    pub classification: Classification,
}

/// A rendered camera frame, ready to be streamed.
///
/// The JPEG is encoded once, by the producer, when the frame is built.
/// Viewers only clone the shared buffer.
#[derive(Debug)]
pub struct AnnotatedFrame {
    pub seq: u64,
    pub captured_at_ms: i64,
    pub fps: f64,
    pub posture: Option<PostureReading>,
    image: RgbImage,
    jpeg: Bytes,
}

impl AnnotatedFrame {
    /// Builds the frame and encodes `image` at `quality`. CPU heavy.
    pub fn encode(
        seq: u64,
        captured_at_ms: i64,
        fps: f64,
        image: RgbImage,
        posture: Option<PostureReading>,
        quality: u8,
    ) -> Result<Self, FrameError> {
        let jpeg = encode_jpeg(&image, quality)?;
        Ok(Self {
            seq,
            captured_at_ms,
            fps,
            posture,
            image,
            jpeg,
        })
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn jpeg(&self) -> Bytes {
        self.jpeg.clone()
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Bytes, FrameError> {
    let mut buf = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(image)?;
    Ok(Bytes::from(buf))
}

/// Wraps a JPEG into one part of a `multipart/x-mixed-replace` body.
///
/// Layout: `--frame\r\nContent-Type: image/jpeg\r\n\r\n<jpeg>\r\n`
pub fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    const HEAD: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    let mut buf = Vec::with_capacity(HEAD.len() + jpeg.len() + 2);
    buf.extend_from_slice(HEAD);
    buf.extend_from_slice(jpeg);
    buf.extend_from_slice(b"\r\n");
    Bytes::from(buf)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}
