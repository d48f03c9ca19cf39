use std::future::Future;
use std::time::Duration;

use posture_common::landmark::{LandmarkError, NormalizedLandmark, PoseLandmarks};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;

use crate::camera::CapturedFrame;

/// Body-pose landmark extractor.
///
/// Returns `Ok(None)` when no person is visible. Landmarks are normalized to
/// the frame's raw (unmirrored) image.
pub trait PoseEstimator: Send + Sync {
    fn estimate(
        &self,
        frame: &CapturedFrame,
    ) -> impl Future<Output = Result<Option<PoseLandmarks>, DetectError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("invalid detector URL {0}: {1}")]
    InvalidUrl(String, String),
    #[error("HTTP client setup failed: {0}")]
    Client(reqwest::Error),
    #[error("detector request failed: {0}")]
    Request(reqwest::Error),
    #[error("detector returned HTTP status {0}")]
    HttpStatus(u16),
    #[error("malformed detector response: {0}")]
    Schema(#[from] LandmarkError),
}

/// Response body of the pose service.
#[derive(Debug, Deserialize)]
struct DetectionResponse {
    #[serde(default)]
    landmarks: Option<Vec<NormalizedLandmark>>,
}

impl DetectionResponse {
    fn into_landmarks(self) -> Result<Option<PoseLandmarks>, DetectError> {
        match self.landmarks {
            Some(landmarks) if !landmarks.is_empty() => Ok(Some(PoseLandmarks::new(landmarks)?)),
            _ => Ok(None),
        }
    }
}

/// Client for a pose estimation service reached over HTTP.
///
/// Each frame's JPEG is POSTed as `image/jpeg`; the service answers with
/// `{"landmarks": [{"x", "y", "z", "visibility"}; 33] | null}`.
pub struct HttpPoseEstimator {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpPoseEstimator {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, DetectError> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| DetectError::InvalidUrl(url.to_string(), e.to_string()))?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .map_err(DetectError::Client)?;
        Ok(Self { client, url })
    }
}

impl PoseEstimator for HttpPoseEstimator {
    async fn estimate(&self, frame: &CapturedFrame) -> Result<Option<PoseLandmarks>, DetectError> {
        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "image/jpeg")
            .body(frame.jpeg.clone())
            .send()
            .await
            .map_err(DetectError::Request)?;

        if !response.status().is_success() {
            return Err(DetectError::HttpStatus(response.status().as_u16()));
        }

        response
            .json::<DetectionResponse>()
            .await
            .map_err(DetectError::Request)?
            .into_landmarks()
    }
}
