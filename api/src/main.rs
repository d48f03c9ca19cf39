mod status;
mod stream;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize};
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use posture_capture::detector::HttpPoseEstimator;
use posture_capture::camera::Camera;
use posture_capture::pipeline::{Pipeline, PipelineSettings};
use posture_common::classify::ThresholdConfig;
use posture_common::config::{Config, ConfigError, ServerConfig};
use posture_common::publish::{frame_channel, FrameSubscriber};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

struct AppState {
    frames: FrameSubscriber,
    thresholds: ThresholdConfig,
    viewers: AtomicUsize,
    next_viewer_id: AtomicU64,
}

impl AppState {
    fn new(frames: FrameSubscriber, thresholds: ThresholdConfig) -> Self {
        Self {
            frames,
            thresholds,
            viewers: AtomicUsize::new(0),
            next_viewer_id: AtomicU64::new(0),
        }
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/video_feed", get(stream::video_feed))
        .route("/frame", get(stream::frame_snapshot))
        .route("/posture", get(status::posture))
        .route("/health", get(status::health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

/// Binds `host:port`. The host may be a name (`localhost`) or a bare IPv4 or
/// IPv6 address (`0.0.0.0`, `::`).
async fn bind_listener(server: &ServerConfig) -> std::io::Result<TcpListener> {
    TcpListener::bind((server.host.as_str(), server.port)).await
}

fn load_config(path: &Path) -> Result<Config, ConfigError> {
    match Config::load(path) {
        Err(ConfigError::ReadFile(_, e)) if e.kind() == std::io::ErrorKind::NotFound => {
            eprintln!("Config file {} not found, using defaults", path.display());
            Ok(Config::default())
        }
        other => other,
    }
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match load_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let camera = match Camera::from_config(&config.camera) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to set up camera: {e}");
            std::process::exit(1);
        }
    };
    let detector = match HttpPoseEstimator::new(&config.detector.url, config.detector.timeout()) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Failed to set up pose detector: {e}");
            std::process::exit(1);
        }
    };

    info!(
        source = ?config.camera.source,
        detector = %config.detector.url,
        min_head = config.thresholds.min_head,
        max_head = config.thresholds.max_head,
        shoulder_max = config.thresholds.shoulder_max,
        spine_min = config.thresholds.spine_min,
        "posture monitor starting"
    );

    let (publisher, frames) = frame_channel();
    let pipeline = Pipeline::new(
        camera,
        detector,
        publisher,
        PipelineSettings::from_config(&config),
    );
    let capture = tokio::spawn(pipeline.run());

    let state = Arc::new(AppState::new(frames, config.thresholds));

    let listener = bind_listener(&config.server).await.unwrap_or_else(|e| {
        eprintln!(
            "Failed to bind to {}:{}: {e}",
            config.server.host, config.server.port
        );
        std::process::exit(1);
    });
    match listener.local_addr() {
        Ok(addr) => info!(%addr, "streaming server listening"),
        Err(e) => warn!(error = %e, "streaming server listening on unknown address"),
    }

    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(capture))
        .await
    {
        eprintln!("Server error: {e}");
        std::process::exit(1);
    }
    info!("posture monitor stopped");
}

/// Resolves on Ctrl-C or SIGTERM, after stopping the capture loop.
///
/// Aborting the loop drops the frame publisher, which ends every open
/// `/video_feed` stream so the server can drain.
async fn shutdown_signal(capture: JoinHandle<()>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown requested, stopping capture");
    capture.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn cors_allows_any_origin() {
        let (_publisher, frames) = frame_channel();
        let app = router(Arc::new(AppState::new(frames, ThresholdConfig::default())));
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/health")
                    .header(header::ORIGIN, "http://dashboard.local")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let (_publisher, frames) = frame_channel();
        let app = router(Arc::new(AppState::new(frames, ThresholdConfig::default())));
        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn binds_host_names() {
        let server = ServerConfig {
            host: "localhost".into(),
            port: 0,
        };
        let listener = bind_listener(&server).await.unwrap();
        assert!(listener.local_addr().unwrap().ip().is_loopback());
    }

    #[tokio::test]
    async fn binds_bare_ipv4_address() {
        let server = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        };
        let listener = bind_listener(&server).await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let config = load_config(Path::new("/nonexistent/posture/config.toml")).unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.host, "0.0.0.0");
    }
}
