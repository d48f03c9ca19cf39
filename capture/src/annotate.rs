use embedded_graphics::pixelcolor::Rgb888;
use image::RgbImage;
use posture_common::classify::{Classification, ThresholdConfig};
use posture_common::frame::PostureReading;
use posture_common::geometry::Point;
use posture_common::landmark::{PixelLandmarks, PoseLandmark, POSE_CONNECTIONS};

use crate::draw::{draw_line, draw_marker, draw_text, Color, TextSize};

pub const OK_COLOR: Color = Rgb888::new(0, 255, 0);
pub const VIOLATION_COLOR: Color = Rgb888::new(255, 0, 0);
pub const LANDMARK_COLOR: Color = Rgb888::new(0, 255, 0);
pub const NEUTRAL_COLOR: Color = Rgb888::new(255, 255, 255);

const LANDMARK_RADIUS: u32 = 5;
const CONNECTION_WIDTH: u32 = 2;

/// Color of a skeleton edge given the current verdict.
///
/// An edge turns red when it belongs to the body part of a failed metric:
/// head edges for head tilt, the shoulder line for shoulder tilt and the
/// shoulder-hip edges for the spine.
pub fn connection_color(
    a: PoseLandmark,
    b: PoseLandmark,
    classification: Option<&Classification>,
) -> Color {
    let Some(c) = classification else {
        return OK_COLOR;
    };
    let head = a.is_head() || b.is_head();
    let shoulder_line = a.is_shoulder() && b.is_shoulder();
    let torso = (a.is_shoulder() && b.is_hip()) || (a.is_hip() && b.is_shoulder());

    if (!c.head_ok && head) || (!c.shoulder_ok && shoulder_line) || (!c.spine_ok && torso) {
        VIOLATION_COLOR
    } else {
        OK_COLOR
    }
}

fn pixel(point: Point) -> (i32, i32) {
    (point.x as i32, point.y as i32)
}

fn in_frame(image: &RgbImage, point: Point) -> bool {
    point.x >= 0.0
        && point.y >= 0.0
        && point.x < image.width() as f64
        && point.y < image.height() as f64
}

fn status_color(ok: bool) -> Color {
    if ok {
        OK_COLOR
    } else {
        VIOLATION_COLOR
    }
}

/// Draws the skeleton and, when a reading is given, the metric readouts.
///
/// Landmarks outside the frame are skipped along with their edges.
pub fn annotate_pose(
    image: &mut RgbImage,
    landmarks: &PixelLandmarks,
    reading: Option<&PostureReading>,
    thresholds: &ThresholdConfig,
) {
    for (_, point) in landmarks.iter() {
        if in_frame(image, point) {
            let (x, y) = pixel(point);
            draw_marker(image, x, y, LANDMARK_RADIUS, LANDMARK_COLOR);
        }
    }

    let classification = reading.map(|r| &r.classification);
    for (a, b) in POSE_CONNECTIONS {
        let (Some(start), Some(end)) = (landmarks.get(a), landmarks.get(b)) else {
            continue;
        };
        if !in_frame(image, start) || !in_frame(image, end) {
            continue;
        }
        let color = connection_color(a, b, classification);
        draw_line(image, pixel(start), pixel(end), color, CONNECTION_WIDTH);
    }

    if let Some(reading) = reading {
        draw_readouts(image, reading, thresholds);
    }
}

fn draw_readouts(image: &mut RgbImage, reading: &PostureReading, thresholds: &ThresholdConfig) {
    let m = &reading.metrics;
    let c = &reading.classification;

    let lines = [
        (format!("Head Tilt: {:.1}", m.head_tilt), status_color(c.head_ok), 30),
        (format!("Shoulder Tilt: {:.1}", m.shoulder_tilt), status_color(c.shoulder_ok), 70),
        (format!("Spine Angle: {:.1}", m.spine_angle), status_color(c.spine_ok), 110),
    ];
    for (text, color, y) in &lines {
        draw_text(image, 10, *y, text, TextSize::Large, *color);
    }

    let limits = [
        (
            format!("Head Tilt Thresholds: {}-{}", thresholds.min_head, thresholds.max_head),
            150,
        ),
        (format!("Shoulder Tilt Threshold: {}", thresholds.shoulder_max), 180),
        (format!("Spine Angle Threshold: {}", thresholds.spine_min), 210),
    ];
    for (text, y) in &limits {
        draw_text(image, 10, *y, text, TextSize::Small, NEUTRAL_COLOR);
    }
}

/// Stamps the instantaneous frame rate in the top-right corner.
pub fn stamp_fps(image: &mut RgbImage, fps: f64) {
    let x = image.width() as i32 - 120;
    draw_text(
        image,
        x,
        30,
        &format!("FPS: {}", fps as u32),
        TextSize::Small,
        NEUTRAL_COLOR,
    );
}
