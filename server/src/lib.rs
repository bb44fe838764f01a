pub mod composer;
pub mod config;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod metrics;
pub mod protocol;
pub mod session;
pub mod validation;

use std::{sync::Arc, time::Instant};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tts_core::SpeechSynthesizer;
use vision_core::Detector;

use crate::{
    config::ServerConfig,
    gate::FrameGate,
    handlers::{detect_endpoint, frames_ws, health_check, metrics_endpoint},
    metrics::AppMetrics,
};

#[derive(Clone)]
pub struct AppState {
    pub detector: Arc<dyn Detector>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Shared by every connection: one frame in flight per process.
    pub gate: Arc<FrameGate>,
    pub metrics: AppMetrics,
    pub config: ServerConfig,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        detector: Arc<dyn Detector>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        config: ServerConfig,
    ) -> Self {
        Self {
            detector,
            synthesizer,
            gate: Arc::new(FrameGate::new(config.min_frame_interval())),
            metrics: AppMetrics::new(),
            config,
            started_at: Instant::now(),
        }
    }
}

/// All routes, mounted at the root and again under `/api`.
pub fn router(state: AppState) -> Router {
    // Base64 inflates by 4/3; leave room for the JSON envelope.
    let body_limit = state.config.max_frame_bytes / 3 * 4 + 64 * 1024;

    let public_api = Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/detect", post(detect_endpoint))
        .route("/ws", get(frames_ws));

    // Metrics endpoint - consider adding authentication in production
    let metrics_api = Router::new().route("/metrics", get(metrics_endpoint));

    let api = Router::new().merge(public_api).merge(metrics_api);

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
