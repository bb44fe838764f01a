use std::time::Instant;

use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use vision_core::{DetectedObject, DetectionError};

use crate::{
    error::ApiError,
    metrics::{DetailedMetricsResponse, EndpointMetricsResponse, GateMetricsResponse, SystemMetrics},
    protocol::{ClientEvent, ServerEvent},
    session::ConnectionSession,
    validation::decode_image_payload,
    AppState,
};

/// Outbound events buffered per connection before the writer applies backpressure
const OUTBOUND_BUFFER: usize = 32;

#[derive(Deserialize)]
pub struct DetectRequest {
    #[serde(default)]
    pub image: String,
}

#[derive(Serialize, Deserialize)]
pub struct DetectResponse {
    pub objects: Vec<DetectedObject>,
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<DetailedMetricsResponse> {
    let mut system = sysinfo::System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let memory_used = system.used_memory();
    let memory_total = system.total_memory();
    let memory_usage_percent = if memory_total > 0 {
        (memory_used as f64 / memory_total as f64 * 100.0) as f32
    } else {
        0.0
    };

    // Unix-like systems only
    let system_load = {
        #[cfg(unix)]
        {
            std::fs::read_to_string("/proc/loadavg")
                .ok()
                .and_then(|loadavg| loadavg.split_whitespace().next()?.parse::<f64>().ok())
        }
        #[cfg(not(unix))]
        None
    };

    let gate = state.gate.state();

    Json(DetailedMetricsResponse {
        timestamp: Utc::now(),
        system: SystemMetrics {
            cpu_usage_percent: system.global_cpu_info().cpu_usage(),
            memory_used_mb: memory_used / 1024 / 1024,
            memory_total_mb: memory_total / 1024 / 1024,
            memory_usage_percent,
            uptime_seconds: state.started_at.elapsed().as_secs(),
            system_load,
        },
        endpoints: EndpointMetricsResponse {
            frames: state.metrics.frames.stats(),
            detect: state.metrics.detect.stats(),
        },
        pipeline: state.metrics.pipeline.snapshot(),
        gate: GateMetricsResponse {
            locked: gate.locked,
            min_interval_ms: state.gate.min_interval().as_millis() as u64,
            ms_since_last_accepted: gate
                .last_accepted_at
                .map(|at| at.elapsed().as_millis() as u64),
        },
    })
}

/// One-shot detection. Bypasses the frame gate.
pub async fn detect_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<DetectRequest>, JsonRejection>,
) -> Result<Json<DetectResponse>, ApiError> {
    let start_time = Instant::now();

    let Json(req) = payload.map_err(|rejection| {
        state.metrics.detect.record_error();
        ApiError::InvalidInput(rejection.body_text())
    })?;

    let image = decode_image_payload(&req.image, state.config.max_frame_bytes).map_err(|e| {
        state.metrics.detect.record_error();
        ApiError::from(e)
    })?;

    let timeout = state.config.detection_timeout();
    let result = match tokio::time::timeout(timeout, state.detector.detect(&image)).await {
        Ok(result) => result,
        Err(_) => Err(DetectionError::Timeout(timeout)),
    };

    match result {
        Ok(detection) => {
            state
                .metrics
                .detect
                .record_request(start_time.elapsed().as_millis() as u64);
            info!(
                "Detect request: {} object(s) in {:?}",
                detection.objects.len(),
                start_time.elapsed()
            );
            Ok(Json(DetectResponse {
                objects: detection.objects,
            }))
        }
        Err(e) => {
            state.metrics.detect.record_error();
            Err(ApiError::from(e))
        }
    }
}

pub async fn frames_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(OUTBOUND_BUFFER);

    let session = ConnectionSession::new(&state, tx);
    let session_id = session.id().to_string();
    state.metrics.pipeline.client_connected();
    info!("[{}] Client connected", session_id);

    // Single writer: events from every frame task are serialized here
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if sender.send(Message::Text(event.to_json().into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    session.announce_connected().await;

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match ClientEvent::parse(text.as_str()) {
                Ok(ClientEvent::Frame(frame)) => {
                    let session = session.clone();
                    tokio::spawn(async move {
                        session.handle_frame(frame).await;
                    });
                }
                Err(e) => session.handle_malformed(&e.to_string()).await,
            },
            Ok(Message::Binary(bytes)) => {
                let session = session.clone();
                let image = bytes.to_vec();
                tokio::spawn(async move {
                    session.handle_binary_frame(image).await;
                });
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("[{}] WebSocket receive error: {}", session_id, e);
                break;
            }
        }
    }

    // In-flight frames keep their sender clones; the writer exits once they finish.
    drop(session);
    state.metrics.pipeline.client_disconnected();
    info!("[{}] Client disconnected", session_id);
    if let Err(e) = writer.await {
        warn!("[{}] Writer task failed: {}", session_id, e);
    }
}
