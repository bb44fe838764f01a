//! Common utilities for integration tests
#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use narration_server::{config::ServerConfig, router, AppState};
use tts_core::{NarrationPayload, SpeechSynthesizer, SynthesisError};
use vision_core::{BoundingBox, DetectedObject, DetectionError, DetectionResult, Detector};

/// Tiny JPEG header, enough to pass validation.
pub const JPEG_B64: &str = "/9j/4AAQ";

pub enum Scene {
    Objects(Vec<DetectedObject>),
    Unavailable,
}

pub struct FakeDetector {
    scene: Scene,
    pub calls: AtomicUsize,
}

#[async_trait]
impl Detector for FakeDetector {
    async fn detect(&self, _image: &[u8]) -> Result<DetectionResult, DetectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.scene {
            Scene::Objects(objects) => Ok(DetectionResult::from_objects(objects.clone())),
            Scene::Unavailable => Err(DetectionError::Remote {
                status: 503,
                message: "model overloaded".into(),
            }),
        }
    }
}

pub struct FakeSynthesizer;

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<NarrationPayload, SynthesisError> {
        Ok(NarrationPayload::mp3(vec![0xFF, 0xFB, 0x90], text))
    }
}

pub fn cat() -> DetectedObject {
    DetectedObject::new(
        "cat",
        0.92,
        BoundingBox {
            x: 0.1,
            y: 0.2,
            width: 0.3,
            height: 0.4,
        },
    )
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        min_frame_interval_ms: 0,
        ..ServerConfig::default()
    }
}

pub fn create_test_state(scene: Scene, config: ServerConfig) -> (AppState, Arc<FakeDetector>) {
    let detector = Arc::new(FakeDetector {
        scene,
        calls: AtomicUsize::new(0),
    });
    let state = AppState::new(detector.clone(), Arc::new(FakeSynthesizer), config);
    (state, detector)
}

/// Create a test app instance backed by in-memory fakes
pub fn create_test_app(scene: Scene) -> Router {
    let (state, _) = create_test_state(scene, test_config());
    router(state)
}

/// Serve the router on an ephemeral port; returns the bound address.
pub async fn spawn_server(state: AppState) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.expect("test server");
    });
    addr
}

pub const WAIT: Duration = Duration::from_secs(5);
