use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geometry::Point;

/// BlazePose 33-point body landmark indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum PoseLandmark {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

impl PoseLandmark {
    pub const COUNT: usize = 33;

    pub const ALL: [PoseLandmark; Self::COUNT] = [
        Self::Nose,
        Self::LeftEyeInner,
        Self::LeftEye,
        Self::LeftEyeOuter,
        Self::RightEyeInner,
        Self::RightEye,
        Self::RightEyeOuter,
        Self::LeftEar,
        Self::RightEar,
        Self::MouthLeft,
        Self::MouthRight,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftElbow,
        Self::RightElbow,
        Self::LeftWrist,
        Self::RightWrist,
        Self::LeftPinky,
        Self::RightPinky,
        Self::LeftIndex,
        Self::RightIndex,
        Self::LeftThumb,
        Self::RightThumb,
        Self::LeftHip,
        Self::RightHip,
        Self::LeftKnee,
        Self::RightKnee,
        Self::LeftAnkle,
        Self::RightAnkle,
        Self::LeftHeel,
        Self::RightHeel,
        Self::LeftFootIndex,
        Self::RightFootIndex,
    ];

    /// The seven points posture metrics are derived from.
    pub const REQUIRED: [PoseLandmark; 7] = [
        Self::Nose,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftHip,
        Self::RightHip,
        Self::LeftEar,
        Self::RightEar,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_head(self) -> bool {
        matches!(self, Self::Nose | Self::LeftEar | Self::RightEar)
    }

    pub fn is_shoulder(self) -> bool {
        matches!(self, Self::LeftShoulder | Self::RightShoulder)
    }

    pub fn is_hip(self) -> bool {
        matches!(self, Self::LeftHip | Self::RightHip)
    }
}

impl fmt::Display for PoseLandmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Skeleton edges drawn between landmarks.
pub const POSE_CONNECTIONS: [(PoseLandmark, PoseLandmark); 35] = {
    use PoseLandmark::*;
    [
        // face
        (Nose, LeftEyeInner),
        (LeftEyeInner, LeftEye),
        (LeftEye, LeftEyeOuter),
        (LeftEyeOuter, LeftEar),
        (Nose, RightEyeInner),
        (RightEyeInner, RightEye),
        (RightEye, RightEyeOuter),
        (RightEyeOuter, RightEar),
        (MouthLeft, MouthRight),
        // arms
        (LeftShoulder, RightShoulder),
        (LeftShoulder, LeftElbow),
        (LeftElbow, LeftWrist),
        (LeftWrist, LeftPinky),
        (LeftWrist, LeftIndex),
        (LeftWrist, LeftThumb),
        (LeftPinky, LeftIndex),
        (RightShoulder, RightElbow),
        (RightElbow, RightWrist),
        (RightWrist, RightPinky),
        (RightWrist, RightIndex),
        (RightWrist, RightThumb),
        (RightPinky, RightIndex),
        // torso
        (LeftShoulder, LeftHip),
        (RightShoulder, RightHip),
        (LeftHip, RightHip),
        // legs
        (LeftHip, LeftKnee),
        (RightHip, RightKnee),
        (LeftKnee, LeftAnkle),
        (RightKnee, RightAnkle),
        (LeftAnkle, LeftHeel),
        (RightAnkle, RightHeel),
        (LeftHeel, LeftFootIndex),
        (RightHeel, RightFootIndex),
        (LeftAnkle, LeftFootIndex),
        (RightAnkle, RightFootIndex),
    ]
};

/// A landmark as reported by the detector, normalized to the image size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedLandmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
    #[serde(default = "default_visibility")]
    pub visibility: f32,
}

fn default_visibility() -> f32 {
    1.0
}

impl NormalizedLandmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            z: 0.0,
            visibility: 1.0,
        }
    }

    /// Pixel coordinates, truncated toward zero.
    pub fn to_pixel(&self, width: u32, height: u32) -> Point {
        let px = (self.x * width as f32) as i32;
        let py = (self.y * height as f32) as i32;
        Point::new(px as f64, py as f64)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LandmarkError {
    #[error("expected {expected} landmarks, got {got}")]
    Count { got: usize, expected: usize },
}

/// One full detection in detector space.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseLandmarks {
    landmarks: Vec<NormalizedLandmark>,
}

impl PoseLandmarks {
    pub fn new(landmarks: Vec<NormalizedLandmark>) -> Result<Self, LandmarkError> {
        if landmarks.len() != PoseLandmark::COUNT {
            return Err(LandmarkError::Count {
                got: landmarks.len(),
                expected: PoseLandmark::COUNT,
            });
        }
        Ok(Self { landmarks })
    }

    pub fn get(&self, landmark: PoseLandmark) -> &NormalizedLandmark {
        &self.landmarks[landmark.index()]
    }

    pub fn set(&mut self, landmark: PoseLandmark, value: NormalizedLandmark) {
        self.landmarks[landmark.index()] = value;
    }

    /// Flip horizontally, matching a horizontally flipped image.
    pub fn mirror(&mut self) {
        for lm in &mut self.landmarks {
            lm.x = 1.0 - lm.x;
        }
    }

    /// Converts to pixel space. Landmarks below `min_visibility` are dropped.
    pub fn to_pixels(&self, width: u32, height: u32, min_visibility: f32) -> PixelLandmarks {
        let mut points = [None; PoseLandmark::COUNT];
        for (slot, lm) in points.iter_mut().zip(&self.landmarks) {
            if lm.visibility >= min_visibility {
                *slot = Some(lm.to_pixel(width, height));
            }
        }
        PixelLandmarks { points }
    }
}

/// Landmarks of the current frame in pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelLandmarks {
    points: [Option<Point>; PoseLandmark::COUNT],
}

impl PixelLandmarks {
    pub fn empty() -> Self {
        Self {
            points: [None; PoseLandmark::COUNT],
        }
    }

    pub fn with(mut self, landmark: PoseLandmark, point: Point) -> Self {
        self.points[landmark.index()] = Some(point);
        self
    }

    pub fn get(&self, landmark: PoseLandmark) -> Option<Point> {
        self.points[landmark.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (PoseLandmark, Point)> + '_ {
        self.points
            .iter()
            .enumerate()
            .filter_map(|(i, point)| Some((PoseLandmark::ALL[i], (*point)?)))
    }
}
