//! Local V4L2 webcam.
//!
//! Only `VIDEO_CAPTURE` devices yielding JPEG or Motion JPEG frames are
//! supported. The device is owned by a dedicated thread because dequeueing
//! blocks; the latest frame is handed over through a watch slot.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::Utc;
use linuxvideo::format::{PixFormat, Pixelformat};
use linuxvideo::stream::ReadStream;
use linuxvideo::{CapabilityFlags, Device};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::camera::{decode_frame, CaptureError, CapturedFrame, FrameSource};

/// Consecutive dequeue failures after which the capture thread gives up.
const MAX_DEQUEUE_FAILURES: u32 = 10;

/// Webcam at `/dev/video<N>`.
///
/// The device is opened on the first read and re-opened on the next read
/// after the capture thread stopped.
pub struct V4l2Camera {
    device: PathBuf,
    width: u32,
    height: u32,
    frames: Option<watch::Receiver<Option<Bytes>>>,
    seq: u64,
}

impl V4l2Camera {
    pub fn new(device: PathBuf, width: u32, height: u32) -> Self {
        Self {
            device,
            width,
            height,
            frames: None,
            seq: 0,
        }
    }

    /// Starts the capture thread and waits until the device is streaming.
    ///
    /// Opening can block for hundreds of milliseconds while the webcam
    /// initializes, so it happens on the capture thread too.
    async fn open(
        device: PathBuf,
        width: u32,
        height: u32,
    ) -> Result<watch::Receiver<Option<Bytes>>, CaptureError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (frames_tx, frames_rx) = watch::channel(None);
        std::thread::Builder::new()
            .name("v4l2-capture".into())
            .spawn(move || capture_thread(&device, width, height, ready_tx, frames_tx))?;
        match ready_rx.await {
            Ok(Ok(())) => Ok(frames_rx),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CaptureError::StreamEnded),
        }
    }

    async fn next_jpeg(&mut self) -> Result<Bytes, CaptureError> {
        if self.frames.is_none() {
            let frames = Self::open(self.device.clone(), self.width, self.height).await?;
            self.frames = Some(frames);
        }
        let Some(frames) = self.frames.as_mut() else {
            return Err(CaptureError::StreamEnded);
        };

        loop {
            if frames.changed().await.is_err() {
                self.frames = None;
                return Err(CaptureError::StreamEnded);
            }
            let latest = frames.borrow_and_update().clone();
            if let Some(jpeg) = latest {
                return Ok(jpeg);
            }
        }
    }
}

impl FrameSource for V4l2Camera {
    async fn next_frame(&mut self) -> Result<CapturedFrame, CaptureError> {
        let jpeg = self.next_jpeg().await?;
        let captured_at_ms = Utc::now().timestamp_millis();
        let seq = self.seq;
        self.seq += 1;
        debug!(seq, bytes = jpeg.len(), "captured frame");
        decode_frame(seq, captured_at_ms, jpeg).await
    }

    fn reset(&mut self) {
        // Dropping the receiver stops the capture thread after its next frame.
        if self.frames.take().is_some() {
            info!(device = %self.device.display(), "dropping stalled webcam");
        }
    }
}

fn open_stream(device: &Path, width: u32, height: u32) -> Result<ReadStream, CaptureError> {
    let dev = Device::open(device)?;
    let caps = dev.capabilities()?.device_capabilities();
    debug!(device = %device.display(), ?caps, "webcam capabilities");
    if !caps.contains(CapabilityFlags::VIDEO_CAPTURE) {
        return Err(CaptureError::Unsupported(format!(
            "{} is not a video capture device",
            device.display()
        )));
    }

    let capture = dev.video_capture(PixFormat::new(width, height, Pixelformat::MJPG))?;
    let format = capture.format();
    match format.pixelformat() {
        Pixelformat::JPEG | Pixelformat::MJPG => {}
        other => {
            return Err(CaptureError::Unsupported(format!(
                "{} delivers pixel format {other}, not JPEG",
                device.display()
            )))
        }
    }
    info!(
        device = %device.display(),
        width = format.width(),
        height = format.height(),
        "opened webcam"
    );
    Ok(capture.into_stream(2)?)
}

fn capture_thread(
    device: &Path,
    width: u32,
    height: u32,
    ready: oneshot::Sender<Result<(), CaptureError>>,
    frames: watch::Sender<Option<Bytes>>,
) {
    let mut stream = match open_stream(device, width, height) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    let mut failures = 0;
    while !frames.is_closed() {
        match stream.dequeue(|buf| Ok::<_, io::Error>(Bytes::copy_from_slice(&buf))) {
            Ok(jpeg) => {
                failures = 0;
                frames.send_replace(Some(jpeg));
            }
            Err(e) => {
                failures += 1;
                warn!(device = %device.display(), error = %e, failures, "webcam dequeue failed");
                if failures >= MAX_DEQUEUE_FAILURES {
                    break;
                }
            }
        }
    }
    info!(device = %device.display(), "webcam capture thread stopped");
}
