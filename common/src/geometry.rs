//! Posture metrics derived from pixel-space landmarks.
//!
//! All angles are in degrees. Image y grows downwards.

use serde::Serialize;
use std::fmt;

use crate::landmark::{PixelLandmarks, PoseLandmark};

/// Distance of the synthetic vertical reference above the shoulder midpoint.
///
/// Only the direction matters for the angle, so the exact value is not
/// resolution sensitive as long as it is non-zero.
pub const SPINE_REFERENCE_OFFSET: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Midpoint with floor division, as for integer pixel coordinates.
    pub fn midpoint(self, other: Point) -> Point {
        Point::new(
            ((self.x + other.x) / 2.0).floor(),
            ((self.y + other.y) / 2.0).floor(),
        )
    }
}

/// Angle in degrees between the segments `a→b` and `b→c`.
///
/// This is the turning angle at `b`: 0° when the path continues straight
/// through `b`, 180° when it doubles back. The cosine is clamped to `[-1, 1]`
/// so round-off on (anti)parallel vectors never leaves the domain of `acos`.
///
/// Returns `None` if either segment has zero length. Callers decide how to
/// treat an undefined angle.
pub fn angle_between(a: Point, b: Point, c: Point) -> Option<f64> {
    let ab = (b.x - a.x, b.y - a.y);
    let bc = (c.x - b.x, c.y - b.y);
    let norm_ab = ab.0.hypot(ab.1);
    let norm_bc = bc.0.hypot(bc.1);
    if norm_ab == 0.0 || norm_bc == 0.0 {
        return None;
    }
    let cos = ((ab.0 * bc.0 + ab.1 * bc.1) / (norm_ab * norm_bc)).clamp(-1.0, 1.0);
    Some(cos.acos().to_degrees())
}

pub fn head_tilt(nose: Point, left_shoulder: Point, right_shoulder: Point) -> Option<f64> {
    angle_between(left_shoulder, nose, right_shoulder)
}

/// Vertical pixel offset between the shoulders.
///
/// A proxy for the slope of the shoulder line, not an angle: the same lean
/// yields a larger value on a higher resolution image or a closer subject.
pub fn shoulder_tilt(left_shoulder: Point, right_shoulder: Point) -> f64 {
    (left_shoulder.y - right_shoulder.y).abs()
}

/// Torso angle against the image vertical, 180° for an upright spine.
pub fn spine_angle(
    left_shoulder: Point,
    right_shoulder: Point,
    left_hip: Point,
    right_hip: Point,
) -> Option<f64> {
    let shoulders = left_shoulder.midpoint(right_shoulder);
    let hips = left_hip.midpoint(right_hip);
    let vertical = Point::new(shoulders.x, shoulders.y - SPINE_REFERENCE_OFFSET);
    angle_between(vertical, shoulders, hips).map(|angle| 180.0 - angle)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    HeadTilt,
    ShoulderTilt,
    SpineAngle,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Metric::HeadTilt => "head tilt",
            Metric::ShoulderTilt => "shoulder tilt",
            Metric::SpineAngle => "spine angle",
        })
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricsError {
    #[error("landmark {0} missing from detection")]
    MissingLandmark(PoseLandmark),
    #[error("{0} is undefined for coincident landmarks")]
    Degenerate(Metric),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PostureMetrics {
    /// Degrees.
    pub head_tilt: f64,
    /// Pixels.
    pub shoulder_tilt: f64,
    /// Degrees.
    pub spine_angle: f64,
}

impl PostureMetrics {
    pub fn from_landmarks(landmarks: &PixelLandmarks) -> Result<Self, MetricsError> {
        let point = |lm: PoseLandmark| landmarks.get(lm).ok_or(MetricsError::MissingLandmark(lm));

        for lm in PoseLandmark::REQUIRED {
            point(lm)?;
        }
        let nose = point(PoseLandmark::Nose)?;
        let left_shoulder = point(PoseLandmark::LeftShoulder)?;
        let right_shoulder = point(PoseLandmark::RightShoulder)?;
        let left_hip = point(PoseLandmark::LeftHip)?;
        let right_hip = point(PoseLandmark::RightHip)?;

        let head_tilt = head_tilt(nose, left_shoulder, right_shoulder)
            .ok_or(MetricsError::Degenerate(Metric::HeadTilt))?;
        let spine_angle = spine_angle(left_shoulder, right_shoulder, left_hip, right_hip)
            .ok_or(MetricsError::Degenerate(Metric::SpineAngle))?;

        Ok(Self {
            head_tilt,
            shoulder_tilt: shoulder_tilt(left_shoulder, right_shoulder),
            spine_angle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn p(x: f64, y: f64) -> Point {
        Point::new(x, y)
    }

    #[test]
    fn angle_is_symmetric_and_bounded() {
        let cases = [
            (p(0.0, 0.0), p(3.0, 1.0), p(5.0, 7.0)),
            (p(-4.0, 2.5), p(1.0, -1.0), p(2.0, 8.0)),
            (p(70.0, 100.0), p(100.0, 50.0), p(130.0, 100.0)),
            (p(10.0, 10.0), p(11.0, 30.0), p(-5.0, 12.0)),
        ];
        for (a, b, c) in cases {
            let forward = angle_between(a, b, c).unwrap();
            let backward = angle_between(c, b, a).unwrap();
            assert!((0.0..=180.0).contains(&forward), "{forward} out of range");
            assert!((forward - backward).abs() < EPS, "{forward} != {backward}");
        }
    }

    #[test]
    fn straight_path_is_zero_and_reversal_is_180() {
        // b between a and c: the path does not turn at b.
        let straight = angle_between(p(0.0, 0.0), p(5.0, 5.0), p(10.0, 10.0)).unwrap();
        assert!(straight.abs() < EPS);

        // a == c: the path doubles back at b.
        let reversal = angle_between(p(2.0, 3.0), p(8.0, -1.0), p(2.0, 3.0)).unwrap();
        assert!((reversal - 180.0).abs() < EPS);
    }

    #[test]
    fn near_parallel_noise_stays_in_domain() {
        let mut x = 1.0_f64;
        for i in 0..1000 {
            let jitter = f64::EPSILON * (i as f64 - 500.0);
            x += 0.1;
            let a = p(0.0, 0.0);
            let b = p(x, x * (1.0 + jitter));
            let c = p(2.0 * x, 2.0 * x * (1.0 - jitter));
            let straight = angle_between(a, b, c).unwrap();
            assert!(!straight.is_nan());
            assert!((0.0..=180.0).contains(&straight));
            let back = angle_between(a, b, a).unwrap();
            assert!(!back.is_nan());
            assert!((0.0..=180.0).contains(&back));
        }
    }

    #[test]
    fn zero_length_segment_is_undefined() {
        assert_eq!(angle_between(p(1.0, 1.0), p(1.0, 1.0), p(4.0, 5.0)), None);
        assert_eq!(angle_between(p(0.0, 0.0), p(4.0, 5.0), p(4.0, 5.0)), None);
    }

    #[test]
    fn head_tilt_matches_closed_form() {
        let nose = p(100.0, 50.0);
        let left = p(70.0, 100.0);
        let right = p(130.0, 100.0);
        // Isosceles triangle: the inner angle at the nose is 2·atan(30/50);
        // the turning angle reported is its supplement.
        let inner = 2.0 * (30.0_f64 / 50.0).atan().to_degrees();
        let expected = 180.0 - inner;
        let tilt = head_tilt(nose, left, right).unwrap();
        assert!((tilt - expected).abs() < 0.1, "{tilt} vs {expected}");
        // Swapping shoulders mirrors the triangle and leaves the angle alone.
        assert!((head_tilt(nose, right, left).unwrap() - tilt).abs() < EPS);
    }

    #[test]
    fn shoulder_tilt_is_absolute_difference() {
        let left = p(70.0, 100.0);
        let right = p(130.0, 140.0);
        assert_eq!(shoulder_tilt(left, right), 40.0);
        assert_eq!(shoulder_tilt(right, left), 40.0);
    }

    #[test]
    fn upright_spine_reads_180() {
        let angle = spine_angle(p(80.0, 100.0), p(120.0, 100.0), p(90.0, 300.0), p(110.0, 300.0))
            .unwrap();
        assert!((angle - 180.0).abs() < EPS);
    }

    #[test]
    fn slouch_reads_lower() {
        // Hips 60px behind the shoulders over a 200px torso.
        let angle = spine_angle(p(80.0, 100.0), p(120.0, 100.0), p(150.0, 300.0), p(170.0, 300.0))
            .unwrap();
        let expected = 180.0 - (60.0_f64 / 200.0).atan().to_degrees();
        assert!((angle - expected).abs() < 1e-6);
        assert!(angle < 171.0);
    }

    #[test]
    fn midpoint_floors_like_integer_division() {
        assert_eq!(p(1.0, 2.0).midpoint(p(4.0, 5.0)), p(2.0, 3.0));
        assert_eq!(p(-1.0, 0.0).midpoint(p(0.0, 0.0)), p(-1.0, 0.0));
    }

    fn upright_landmarks() -> PixelLandmarks {
        PixelLandmarks::empty()
            .with(PoseLandmark::Nose, p(100.0, 20.0))
            .with(PoseLandmark::LeftEar, p(90.0, 15.0))
            .with(PoseLandmark::RightEar, p(110.0, 15.0))
            .with(PoseLandmark::LeftShoulder, p(70.0, 100.0))
            .with(PoseLandmark::RightShoulder, p(130.0, 100.0))
            .with(PoseLandmark::LeftHip, p(80.0, 300.0))
            .with(PoseLandmark::RightHip, p(120.0, 300.0))
    }

    #[test]
    fn metrics_from_full_landmark_set() {
        let metrics = PostureMetrics::from_landmarks(&upright_landmarks()).unwrap();
        assert_eq!(metrics.shoulder_tilt, 0.0);
        assert!((metrics.spine_angle - 180.0).abs() < EPS);
        let expected_head = 180.0 - 2.0 * (30.0_f64 / 80.0).atan().to_degrees();
        assert!((metrics.head_tilt - expected_head).abs() < 1e-6);
    }

    #[test]
    fn missing_ear_blocks_metrics() {
        let mut landmarks = PixelLandmarks::empty();
        for (lm, point) in upright_landmarks().iter() {
            if lm != PoseLandmark::RightEar {
                landmarks = landmarks.with(lm, point);
            }
        }
        assert_eq!(
            PostureMetrics::from_landmarks(&landmarks),
            Err(MetricsError::MissingLandmark(PoseLandmark::RightEar))
        );
    }

    #[test]
    fn coincident_nose_and_shoulder_is_degenerate() {
        let landmarks = upright_landmarks().with(PoseLandmark::Nose, p(70.0, 100.0));
        assert_eq!(
            PostureMetrics::from_landmarks(&landmarks),
            Err(MetricsError::Degenerate(Metric::HeadTilt))
        );
    }
}
