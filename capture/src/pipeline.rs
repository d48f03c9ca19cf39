use std::time::{Duration, Instant};

use image::imageops;
use posture_common::classify::ThresholdConfig;
use posture_common::config::Config;
use posture_common::frame::{AnnotatedFrame, FrameError, PostureReading};
use posture_common::geometry::{MetricsError, PostureMetrics};
use posture_common::landmark::PoseLandmarks;
use posture_common::publish::FramePublisher;
use tracing::{debug, info, warn};

use crate::annotate::{annotate_pose, stamp_fps};
use crate::camera::{CaptureError, CapturedFrame, FrameSource};
use crate::detector::PoseEstimator;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("no camera frame within {0:?}")]
    CaptureTimeout(Duration),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] FrameError),
    #[error("render task failed: {0}")]
    Render(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub mirror: bool,
    pub read_timeout: Duration,
    pub retry_delay: Duration,
    pub loop_delay: Duration,
    pub min_visibility: f32,
    pub thresholds: ThresholdConfig,
    pub jpeg_quality: u8,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mirror: config.camera.mirror,
            read_timeout: config.camera.read_timeout(),
            retry_delay: config.camera.retry_delay(),
            loop_delay: config.pipeline.loop_delay(),
            min_visibility: config.detector.min_visibility,
            thresholds: config.thresholds,
            jpeg_quality: config.stream.jpeg_quality,
        }
    }
}

/// Instantaneous frame rate from the gap between consecutive frames.
#[derive(Debug, Default)]
pub struct FpsCounter {
    last: Option<Instant>,
}

impl FpsCounter {
    /// Records a frame at `now`. The first frame reports 0.
    pub fn tick(&mut self, now: Instant) -> f64 {
        let fps = match self.last {
            Some(prev) => {
                let elapsed = now.saturating_duration_since(prev).as_secs_f64();
                if elapsed > 0.0 {
                    1.0 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.last = Some(now);
        fps
    }
}

/// Mirrors, measures, draws and encodes one frame.
///
/// Metrics are only computed when all required landmarks are present;
/// otherwise the frame goes out with just the FPS stamp. Coincident landmarks
/// still get a skeleton, drawn without a verdict.
pub fn render_frame(
    captured: CapturedFrame,
    landmarks: Option<PoseLandmarks>,
    fps: f64,
    settings: &PipelineSettings,
) -> Result<AnnotatedFrame, FrameError> {
    let CapturedFrame {
        seq,
        captured_at_ms,
        mut image,
        ..
    } = captured;

    if settings.mirror {
        imageops::flip_horizontal_in_place(&mut image);
    }

    let mut posture = None;
    if let Some(mut landmarks) = landmarks {
        if settings.mirror {
            landmarks.mirror();
        }
        let pixels = landmarks.to_pixels(image.width(), image.height(), settings.min_visibility);
        match PostureMetrics::from_landmarks(&pixels) {
            Ok(metrics) => {
                let reading = PostureReading {
                    metrics,
                    classification: settings.thresholds.classify(&metrics),
                };
                annotate_pose(&mut image, &pixels, Some(&reading), &settings.thresholds);
                posture = Some(reading);
            }
            Err(e @ MetricsError::Degenerate(_)) => {
                debug!(seq, error = %e, "posture metrics undefined");
                annotate_pose(&mut image, &pixels, None, &settings.thresholds);
            }
            Err(e @ MetricsError::MissingLandmark(_)) => {
                debug!(seq, error = %e, "incomplete detection, passing frame through");
            }
        }
    }

    stamp_fps(&mut image, fps);
    AnnotatedFrame::encode(seq, captured_at_ms, fps, image, posture, settings.jpeg_quality)
}

/// The capture → detect → annotate → publish loop.
pub struct Pipeline<C, D> {
    camera: C,
    detector: D,
    publisher: FramePublisher,
    settings: PipelineSettings,
    fps: FpsCounter,
}

impl<C: FrameSource, D: PoseEstimator> Pipeline<C, D> {
    pub fn new(camera: C, detector: D, publisher: FramePublisher, settings: PipelineSettings) -> Self {
        Self {
            camera,
            detector,
            publisher,
            settings,
            fps: FpsCounter::default(),
        }
    }

    /// Runs until the task is aborted. Per-frame failures are logged and
    /// retried; none of them ends the loop.
    pub async fn run(mut self) {
        info!(
            mirror = self.settings.mirror,
            loop_delay_ms = self.settings.loop_delay.as_millis() as u64,
            "capture loop running"
        );
        loop {
            match self.step().await {
                Ok(_) => tokio::time::sleep(self.settings.loop_delay).await,
                Err(e) => {
                    warn!(error = %e, "frame skipped, retrying in {:?}", self.settings.retry_delay);
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
            }
        }
    }

    /// One loop iteration. Returns the sequence number of the published frame.
    pub async fn step(&mut self) -> Result<u64, PipelineError> {
        let captured =
            match tokio::time::timeout(self.settings.read_timeout, self.camera.next_frame()).await {
                Ok(result) => result?,
                Err(_) => {
                    self.camera.reset();
                    return Err(PipelineError::CaptureTimeout(self.settings.read_timeout));
                }
            };
        let fps = self.fps.tick(Instant::now());

        let landmarks = match self.detector.estimate(&captured).await {
            Ok(Some(landmarks)) => Some(landmarks),
            Ok(None) => {
                debug!(seq = captured.seq, "no person detected");
                None
            }
            Err(e) => {
                warn!(seq = captured.seq, error = %e, "pose detection failed, passing frame through");
                None
            }
        };

        let settings = self.settings.clone();
        let frame =
            tokio::task::spawn_blocking(move || render_frame(captured, landmarks, fps, &settings))
                .await??;

        let seq = frame.seq;
        self.publisher.publish(frame);
        let published = self.publisher.published();
        if published % 100 == 0 {
            debug!(
                published,
                viewers = self.publisher.viewer_count().saturating_sub(1),
                "frames published"
            );
        }
        Ok(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use image::{Rgb, RgbImage};
    use posture_common::landmark::{NormalizedLandmark, PoseLandmark};
    use posture_common::publish::frame_channel;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const WIDTH: u32 = 640;
    const HEIGHT: u32 = 480;

    fn settings() -> PipelineSettings {
        PipelineSettings {
            mirror: false,
            read_timeout: Duration::from_millis(200),
            retry_delay: Duration::from_millis(1),
            loop_delay: Duration::from_millis(1),
            min_visibility: 0.0,
            thresholds: ThresholdConfig::default(),
            jpeg_quality: 80,
        }
    }

    fn captured(seq: u64) -> CapturedFrame {
        let mut image = RgbImage::new(WIDTH, HEIGHT);
        // Leftmost column marked so mirroring is observable.
        for y in 0..HEIGHT {
            image.put_pixel(0, y, Rgb([0, 0, 255]));
        }
        CapturedFrame {
            seq,
            captured_at_ms: 1708300000000 + seq as i64,
            jpeg: Bytes::from_static(b"\xFF\xD8\xFF\xD9"),
            image,
        }
    }

    /// Upright sitter with level shoulders, in normalized coordinates.
    fn upright_pose() -> PoseLandmarks {
        let mut pose =
            PoseLandmarks::new(vec![NormalizedLandmark::new(0.5, 0.5); PoseLandmark::COUNT]).unwrap();
        let set = |pose: &mut PoseLandmarks, lm, x, y| pose.set(lm, NormalizedLandmark::new(x, y));
        set(&mut pose, PoseLandmark::Nose, 0.5, 0.1);
        set(&mut pose, PoseLandmark::LeftEar, 0.45, 0.08);
        set(&mut pose, PoseLandmark::RightEar, 0.55, 0.08);
        set(&mut pose, PoseLandmark::LeftShoulder, 0.375, 0.5);
        set(&mut pose, PoseLandmark::RightShoulder, 0.625, 0.5);
        set(&mut pose, PoseLandmark::LeftHip, 0.4375, 0.9);
        set(&mut pose, PoseLandmark::RightHip, 0.5625, 0.9);
        pose
    }

    enum Shot {
        Frame,
        Fail,
        Hang,
    }

    struct ScriptedCamera {
        script: VecDeque<Shot>,
        seq: u64,
        resets: Arc<AtomicUsize>,
    }

    impl ScriptedCamera {
        fn new(script: impl IntoIterator<Item = Shot>) -> Self {
            Self {
                script: script.into_iter().collect(),
                seq: 0,
                resets: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl FrameSource for ScriptedCamera {
        async fn next_frame(&mut self) -> Result<CapturedFrame, CaptureError> {
            match self.script.pop_front().unwrap_or(Shot::Frame) {
                Shot::Frame => {
                    let frame = captured(self.seq);
                    self.seq += 1;
                    Ok(frame)
                }
                Shot::Fail => Err(CaptureError::StreamEnded),
                Shot::Hang => std::future::pending().await,
            }
        }

        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FixedDetector(Option<PoseLandmarks>);

    impl PoseEstimator for FixedDetector {
        async fn estimate(
            &self,
            _frame: &CapturedFrame,
        ) -> Result<Option<PoseLandmarks>, crate::detector::DetectError> {
            Ok(self.0.clone())
        }
    }

    struct FailingDetector;

    impl PoseEstimator for FailingDetector {
        async fn estimate(
            &self,
            _frame: &CapturedFrame,
        ) -> Result<Option<PoseLandmarks>, crate::detector::DetectError> {
            Err(crate::detector::DetectError::HttpStatus(503))
        }
    }

    #[test]
    fn fps_counter_starts_at_zero() {
        let mut fps = FpsCounter::default();
        let t0 = Instant::now();
        assert_eq!(fps.tick(t0), 0.0);
        let rate = fps.tick(t0 + Duration::from_millis(40));
        assert!((rate - 25.0).abs() < 1e-6);
        let rate = fps.tick(t0 + Duration::from_millis(140));
        assert!((rate - 10.0).abs() < 1e-6);
    }

    #[test]
    fn render_measures_full_detection() {
        let frame = render_frame(captured(0), Some(upright_pose()), 12.0, &settings()).unwrap();
        let reading = frame.posture.expect("metrics for a full detection");
        // Shoulders at y = 240 on both sides, hips centered under them.
        assert_eq!(reading.metrics.shoulder_tilt, 0.0);
        assert!((reading.metrics.spine_angle - 180.0).abs() < 1e-9);
        assert!(reading.classification.shoulder_ok);
        assert!(reading.classification.spine_ok);
        assert_eq!(frame.fps, 12.0);
    }

    #[test]
    fn render_passes_through_without_detection() {
        let before = captured(4);
        let frame = render_frame(before.clone(), None, 0.0, &settings()).unwrap();
        assert!(frame.posture.is_none());
        assert_eq!(frame.seq, 4);
        // Only the FPS stamp differs: the left edge is untouched.
        assert_eq!(frame.image().get_pixel(0, 200), before.image.get_pixel(0, 200));
    }

    #[test]
    fn render_skips_metrics_for_incomplete_detection() {
        let mut pose = upright_pose();
        pose.set(
            PoseLandmark::RightEar,
            NormalizedLandmark {
                visibility: 0.2,
                ..NormalizedLandmark::new(0.55, 0.08)
            },
        );
        let settings = PipelineSettings {
            min_visibility: 0.5,
            ..settings()
        };
        let frame = render_frame(captured(0), Some(pose), 0.0, &settings).unwrap();
        assert!(frame.posture.is_none());
    }

    #[test]
    fn render_mirrors_image_and_landmarks() {
        let mirrored_settings = PipelineSettings {
            mirror: true,
            ..settings()
        };
        let mut pose = upright_pose();
        // Lean the nose sideways; mirroring must not change the measurements.
        pose.set(PoseLandmark::Nose, NormalizedLandmark::new(0.3, 0.1));
        let plain = render_frame(captured(0), Some(pose.clone()), 0.0, &settings()).unwrap();
        let mirrored = render_frame(captured(0), Some(pose), 0.0, &mirrored_settings).unwrap();
        assert_eq!(mirrored.image().get_pixel(WIDTH - 1, 300), &Rgb([0, 0, 255]));
        let (a, b) = (plain.posture.unwrap().metrics, mirrored.posture.unwrap().metrics);
        assert!((a.head_tilt - b.head_tilt).abs() < 1.0);
        assert_eq!(a.shoulder_tilt, b.shoulder_tilt);
    }

    #[tokio::test]
    async fn step_publishes_annotated_frames() {
        let (publisher, subscriber) = frame_channel();
        let mut pipeline = Pipeline::new(
            ScriptedCamera::new([]),
            FixedDetector(Some(upright_pose())),
            publisher,
            settings(),
        );

        assert_eq!(pipeline.step().await.unwrap(), 0);
        let first = subscriber.latest().unwrap();
        assert_eq!(first.fps, 0.0);
        assert!(first.posture.is_some());
        // Encoded before publishing, so viewers never encode.
        assert!(first.jpeg().starts_with(&[0xFF, 0xD8]));

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(pipeline.step().await.unwrap(), 1);
        let second = subscriber.latest().unwrap();
        assert!(second.fps > 0.0);
        assert_eq!(subscriber.frames_published(), 2);
    }

    #[tokio::test]
    async fn capture_failure_skips_iteration() {
        let (publisher, subscriber) = frame_channel();
        let mut pipeline = Pipeline::new(
            ScriptedCamera::new([Shot::Fail, Shot::Frame]),
            FixedDetector(None),
            publisher,
            settings(),
        );
        assert!(matches!(pipeline.step().await, Err(PipelineError::Capture(_))));
        assert!(subscriber.latest().is_none());
        assert_eq!(pipeline.step().await.unwrap(), 0);
        assert!(subscriber.latest().unwrap().posture.is_none());
    }

    #[tokio::test]
    async fn stalled_camera_times_out_and_resets() {
        let (publisher, subscriber) = frame_channel();
        let camera = ScriptedCamera::new([Shot::Hang]);
        let resets = Arc::clone(&camera.resets);
        let settings = PipelineSettings {
            read_timeout: Duration::from_millis(20),
            ..settings()
        };
        let mut pipeline = Pipeline::new(camera, FixedDetector(None), publisher, settings);
        assert!(matches!(
            pipeline.step().await,
            Err(PipelineError::CaptureTimeout(_))
        ));
        assert_eq!(resets.load(Ordering::SeqCst), 1);
        assert!(subscriber.latest().is_none());
        pipeline.step().await.unwrap();
    }

    #[tokio::test]
    async fn detector_failure_passes_frame_through() {
        let (publisher, subscriber) = frame_channel();
        let mut pipeline =
            Pipeline::new(ScriptedCamera::new([]), FailingDetector, publisher, settings());
        pipeline.step().await.unwrap();
        let frame = subscriber.latest().unwrap();
        assert!(frame.posture.is_none());
    }

    #[tokio::test]
    async fn run_keeps_going_after_failures() {
        let (publisher, mut subscriber) = frame_channel();
        let pipeline = Pipeline::new(
            ScriptedCamera::new([Shot::Fail, Shot::Fail, Shot::Frame]),
            FixedDetector(Some(upright_pose())),
            publisher,
            settings(),
        );
        let task = tokio::spawn(pipeline.run());
        let frame = tokio::time::timeout(Duration::from_secs(5), subscriber.next_frame())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.seq, 0);
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        // Aborting the loop drops the publisher and closes the slot.
        let drained = tokio::time::timeout(Duration::from_secs(1), async {
            while subscriber.next_frame().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok());
    }
}
