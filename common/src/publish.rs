//! Single-writer, multi-reader slot holding the latest annotated frame.
//!
//! Publishing swaps an `Arc` in place and never waits for readers. Each reader
//! tracks what it has already seen and only ever observes the newest frame;
//! frames published while a reader is busy are skipped for that reader.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::frame::AnnotatedFrame;

type Slot = Option<Arc<AnnotatedFrame>>;

/// Creates a connected publisher/subscriber pair with an empty slot.
pub fn frame_channel() -> (FramePublisher, FrameSubscriber) {
    let (tx, rx) = watch::channel(None);
    let published = Arc::new(AtomicU64::new(0));
    (
        FramePublisher {
            tx,
            published: Arc::clone(&published),
        },
        FrameSubscriber { rx, published },
    )
}

/// Write half, owned by the capture loop.
///
/// Dropping it closes the slot: subscribers waiting for a new frame are woken
/// and see the end of the stream.
pub struct FramePublisher {
    tx: watch::Sender<Slot>,
    published: Arc<AtomicU64>,
}

impl FramePublisher {
    pub fn publish(&self, frame: AnnotatedFrame) {
        let (seq, width, height) = (frame.seq, frame.image().width(), frame.image().height());
        self.tx.send_replace(Some(Arc::new(frame)));
        if self.published.fetch_add(1, Ordering::Relaxed) == 0 {
            info!(seq, width, height, "first frame published");
        }
    }

    pub fn viewer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Frames published so far, shared with every subscriber.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

/// Read half. Clone one per consumer.
#[derive(Clone)]
pub struct FrameSubscriber {
    rx: watch::Receiver<Slot>,
    published: Arc<AtomicU64>,
}

impl FrameSubscriber {
    /// The current frame without waiting, if any was published.
    pub fn latest(&self) -> Option<Arc<AnnotatedFrame>> {
        self.rx.borrow().clone()
    }

    /// Waits for a frame this subscriber has not seen yet.
    ///
    /// Before the first publish this waits for it. Returns `None` once the
    /// publisher is gone.
    pub async fn next_frame(&mut self) -> Option<Arc<AnnotatedFrame>> {
        loop {
            if self.rx.changed().await.is_err() {
                return None;
            }
            if let Some(frame) = self.rx.borrow_and_update().clone() {
                return Some(frame);
            }
        }
    }

    pub fn frames_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}
