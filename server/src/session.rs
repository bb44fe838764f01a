//! Per-connection frame pipeline.
//!
//! A [`ConnectionSession`] owns nothing of the socket: it receives decoded
//! client frames, runs them through the shared [`FrameGate`], the detector,
//! the composer and the synthesizer, and pushes [`ServerEvent`]s into an mpsc
//! channel that the socket writer drains. Every admitted frame ends with
//! exactly one `detection_result`, preceded by one `error` when it failed.

use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tts_core::{NarrationPayload, SpeechSynthesizer};
use vision_core::{DetectionError, Detector};

use crate::{
    composer::ResponseComposer,
    config::{RejectPolicy, ServerConfig},
    error::FrameError,
    gate::{Admission, FrameGate, Rejection},
    metrics::{AppMetrics, PipelineMetrics},
    protocol::{InboundFrame, OutgoingResult, ServerEvent, StatusKind},
    validation::{decode_image_payload, validate_image_bytes},
    AppState,
};

/// Where the frame this connection has in flight currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Admitting,
    Detecting,
    Composing,
    Synthesizing,
    Emitting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Detection,
    Internal,
}

/// How a submitted frame ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Failed validation; the gate was never consulted.
    Invalid,
    Rejected(Rejection),
    Completed { objects: usize, narrated: bool },
    Failed(FailureKind),
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub reject_policy: RejectPolicy,
    pub max_frame_bytes: usize,
    pub detection_timeout: Duration,
    pub synthesis_timeout: Duration,
}

impl From<&ServerConfig> for SessionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            reject_policy: config.reject_policy,
            max_frame_bytes: config.max_frame_bytes,
            detection_timeout: config.detection_timeout(),
            synthesis_timeout: config.synthesis_timeout(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

/// A validated image waiting for admission.
#[derive(Debug)]
pub struct Frame {
    pub id: String,
    pub image: Vec<u8>,
    pub received_at: Instant,
}

impl Frame {
    fn new(id: Option<String>, image: Vec<u8>) -> Self {
        Self {
            id: id.unwrap_or_else(short_id),
            image,
            received_at: Instant::now(),
        }
    }
}

#[derive(Clone)]
pub struct ConnectionSession {
    id: String,
    detector: Arc<dyn Detector>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    gate: Arc<FrameGate>,
    composer: ResponseComposer,
    metrics: AppMetrics,
    settings: SessionSettings,
    tx: mpsc::Sender<ServerEvent>,
    state: Arc<Mutex<SessionState>>,
}

impl ConnectionSession {
    pub fn new(app: &AppState, tx: mpsc::Sender<ServerEvent>) -> Self {
        Self::with_parts(
            app.detector.clone(),
            app.synthesizer.clone(),
            app.gate.clone(),
            app.metrics.clone(),
            SessionSettings::from(&app.config),
            tx,
        )
    }

    pub fn with_parts(
        detector: Arc<dyn Detector>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        gate: Arc<FrameGate>,
        metrics: AppMetrics,
        settings: SessionSettings,
        tx: mpsc::Sender<ServerEvent>,
    ) -> Self {
        Self {
            id: short_id(),
            detector,
            synthesizer,
            gate,
            composer: ResponseComposer::default(),
            metrics,
            settings,
            tx,
            state: Arc::new(Mutex::new(SessionState::Idle)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn announce_connected(&self) {
        self.emit(ServerEvent::status(StatusKind::Connected)).await;
    }

    /// Unparseable client message. Never touches the gate.
    pub async fn handle_malformed(&self, reason: &str) {
        debug!("[{}] Malformed client message: {}", self.id, reason);
        PipelineMetrics::incr(&self.metrics.pipeline.invalid_frames);
        self.emit(ServerEvent::error(format!("Invalid message: {reason}")))
            .await;
    }

    /// Base64 frame from a JSON `frame` message.
    pub async fn handle_frame(&self, inbound: InboundFrame) -> FrameOutcome {
        PipelineMetrics::incr(&self.metrics.pipeline.frames_received);
        let frame_id = inbound.frame_id.map(|id| id.to_string());

        match decode_image_payload(&inbound.data, self.settings.max_frame_bytes) {
            Ok(image) => self.run(Frame::new(frame_id, image)).await,
            Err(e) => self.reject_invalid(FrameError::from(e)).await,
        }
    }

    /// Raw image bytes from a binary WebSocket message.
    pub async fn handle_binary_frame(&self, image: Vec<u8>) -> FrameOutcome {
        PipelineMetrics::incr(&self.metrics.pipeline.frames_received);

        match validate_image_bytes(&image, self.settings.max_frame_bytes) {
            Ok(()) => self.run(Frame::new(None, image)).await,
            Err(e) => self.reject_invalid(FrameError::from(e)).await,
        }
    }

    async fn reject_invalid(&self, err: FrameError) -> FrameOutcome {
        debug!("[{}] Invalid frame: {}", self.id, err);
        PipelineMetrics::incr(&self.metrics.pipeline.invalid_frames);
        self.emit(ServerEvent::error(err.to_string())).await;
        FrameOutcome::Invalid
    }

    async fn run(&self, frame: Frame) -> FrameOutcome {
        let permit = match self.gate.try_acquire(Instant::now()) {
            Admission::Admitted(permit) => permit,
            Admission::Rejected(rejection) => return self.reject_message(&frame, rejection).await,
        };

        self.set_state(SessionState::Admitting);
        PipelineMetrics::incr(&self.metrics.pipeline.frames_admitted);
        info!(
            "[{}] Frame {} admitted ({} bytes, queued {:?})",
            self.id,
            frame.id,
            frame.image.len(),
            frame.received_at.elapsed()
        );

        let started = Instant::now();
        let processed = AssertUnwindSafe(self.process(&frame)).catch_unwind().await;

        let (outcome, events) = match processed {
            Ok(Ok(result)) => {
                let outcome = FrameOutcome::Completed {
                    objects: result.objects.len(),
                    narrated: result.audio.is_some(),
                };
                if result.audio.is_some() {
                    PipelineMetrics::incr(&self.metrics.pipeline.narrations_sent);
                }
                (outcome, vec![ServerEvent::from(result)])
            }
            Ok(Err(e)) => {
                error!("[{}] Frame {} detection failed: {}", self.id, frame.id, e);
                PipelineMetrics::incr(&self.metrics.pipeline.detection_errors);
                self.metrics.frames.record_error();
                (
                    FrameOutcome::Failed(FailureKind::Detection),
                    failure_events(FrameError::from(e)),
                )
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!("[{}] Frame {} processing panicked: {}", self.id, frame.id, reason);
                PipelineMetrics::incr(&self.metrics.pipeline.internal_errors);
                self.metrics.frames.record_error();
                (
                    FrameOutcome::Failed(FailureKind::Internal),
                    failure_events(FrameError::Internal(reason)),
                )
            }
        };

        self.metrics
            .frames
            .record_request(started.elapsed().as_millis() as u64);
        // The gate is never held across outbound sends.
        permit.release(Instant::now());

        self.set_state(SessionState::Emitting);
        for event in events {
            self.emit(event).await;
        }
        self.set_state(SessionState::Idle);
        debug!("[{}] Frame {} finished: {:?}", self.id, frame.id, outcome);
        outcome
    }

    /// Not admitted: count it and, under the signal policy, tell the client.
    pub async fn reject_message(&self, frame: &Frame, rejection: Rejection) -> FrameOutcome {
        let counter = match rejection {
            Rejection::Busy => &self.metrics.pipeline.rejected_busy,
            Rejection::Throttled => &self.metrics.pipeline.rejected_throttled,
        };
        PipelineMetrics::incr(counter);
        debug!("[{}] Frame {} rejected: {}", self.id, frame.id, rejection);

        if self.settings.reject_policy == RejectPolicy::Signal {
            self.emit(ServerEvent::status(rejection.into())).await;
        }
        FrameOutcome::Rejected(rejection)
    }

    async fn process(&self, frame: &Frame) -> Result<OutgoingResult, DetectionError> {
        self.set_state(SessionState::Detecting);
        let detection = tokio::time::timeout(
            self.settings.detection_timeout,
            self.detector.detect(&frame.image),
        )
        .await
        .map_err(|_| DetectionError::Timeout(self.settings.detection_timeout))??;
        debug!(
            "[{}] Frame {} detected {} object(s)",
            self.id,
            frame.id,
            detection.objects.len()
        );

        self.set_state(SessionState::Composing);
        let composition = self.composer.compose(&detection);

        let audio = match composition.narration {
            Some(text) => self.narrate(&frame.id, &text).await,
            None => None,
        };

        Ok(OutgoingResult {
            objects: composition.objects,
            audio,
        })
    }

    /// Synthesis failure only costs the audio.
    async fn narrate(&self, frame_id: &str, text: &str) -> Option<NarrationPayload> {
        self.set_state(SessionState::Synthesizing);
        let result = tokio::time::timeout(
            self.settings.synthesis_timeout,
            self.synthesizer.synthesize(text),
        )
        .await;

        match result {
            Ok(Ok(payload)) => Some(payload),
            Ok(Err(e)) => {
                warn!("[{}] Frame {} sent without audio: {}", self.id, frame_id, e);
                PipelineMetrics::incr(&self.metrics.pipeline.synthesis_failures);
                None
            }
            Err(_) => {
                warn!(
                    "[{}] Frame {} sent without audio: synthesis timed out after {:?}",
                    self.id, frame_id, self.settings.synthesis_timeout
                );
                PipelineMetrics::incr(&self.metrics.pipeline.synthesis_failures);
                None
            }
        }
    }

    async fn emit(&self, event: ServerEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("[{}] Client gone, dropping outbound event", self.id);
        }
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("[{}] {:?} -> {:?}", self.id, *state, next);
        *state = next;
    }
}

fn short_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// `error` followed by an empty `detection_result`.
fn failure_events(err: FrameError) -> Vec<ServerEvent> {
    vec![ServerEvent::error(err.to_string()), ServerEvent::empty_result()]
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unexpected panic".to_string()
    }
}
