use std::convert::Infallible;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::stream::{self, Stream};
use posture_common::frame::{mjpeg_part, MJPEG_CONTENT_TYPE};
use posture_common::publish::FrameSubscriber;
use tracing::info;

use crate::AppState;

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// One connected `/video_feed` client.
///
/// Owns its own subscriber; dropping it (client gone or stream ended)
/// releases the subscriber and updates the viewer count.
struct Viewer {
    id: u64,
    state: Arc<AppState>,
    frames: FrameSubscriber,
    sent: u64,
}

impl Viewer {
    fn attach(state: Arc<AppState>) -> Self {
        let id = state.next_viewer_id.fetch_add(1, Ordering::Relaxed);
        let viewers = state.viewers.fetch_add(1, Ordering::Relaxed) + 1;
        info!(viewer = id, viewers, "viewer connected");
        Self {
            id,
            frames: state.frames.clone(),
            state,
            sent: 0,
        }
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        let viewers = self.state.viewers.fetch_sub(1, Ordering::Relaxed) - 1;
        info!(viewer = self.id, frames_sent = self.sent, viewers, "viewer disconnected");
    }
}

/// Endless multipart body: one part per frame this viewer has not yet seen.
///
/// Frames arrive already encoded. Ends when the frame publisher goes away.
fn multipart_stream(state: Arc<AppState>) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
    stream::unfold(Viewer::attach(state), |mut viewer| async move {
        let frame = viewer.frames.next_frame().await?;
        viewer.sent += 1;
        Some((Ok::<_, Infallible>(mjpeg_part(&frame.jpeg())), viewer))
    })
}

/// GET /video_feed: MJPEG stream of annotated frames
pub(crate) async fn video_feed(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, MJPEG_CONTENT_TYPE), (CACHE_CONTROL, NO_CACHE)],
        Body::from_stream(multipart_stream(state)),
    )
}

/// GET /frame: latest annotated frame as a single JPEG
pub(crate) async fn frame_snapshot(State(state): State<Arc<AppState>>) -> Response {
    let Some(frame) = state.frames.latest() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no frame captured yet").into_response();
    };
    ([(CONTENT_TYPE, "image/jpeg"), (CACHE_CONTROL, NO_CACHE)], frame.jpeg()).into_response()
}
