use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use posture_common::classify::{Classification, ThresholdConfig};
use posture_common::geometry::PostureMetrics;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
struct PostureStatus {
    seq: u64,
    captured_at_ms: i64,
    fps: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics: Option<PostureMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    classification: Option<Classification>,
    thresholds: ThresholdConfig,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    frames_published: u64,
    viewers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_frame_age_ms: Option<i64>,
}

/// GET /posture: metrics and verdict of the latest frame
pub(crate) async fn posture(State(state): State<Arc<AppState>>) -> Response {
    let Some(frame) = state.frames.latest() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no frame captured yet").into_response();
    };
    Json(PostureStatus {
        seq: frame.seq,
        captured_at_ms: frame.captured_at_ms,
        fps: frame.fps,
        metrics: frame.posture.map(|p| p.metrics),
        classification: frame.posture.map(|p| p.classification),
        thresholds: state.thresholds,
    })
    .into_response()
}

/// GET /health
pub(crate) async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let last_frame_age_ms = state
        .frames
        .latest()
        .map(|frame| (Utc::now().timestamp_millis() - frame.captured_at_ms).max(0));
    Json(Health {
        status: "ok",
        frames_published: state.frames.frames_published(),
        viewers: state.viewers.load(Ordering::Relaxed),
        last_frame_age_ms,
    })
}
