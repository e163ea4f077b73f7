//! Per-camera power lifecycle and frame loop
//!
//! Camera power follows the session mode: powered on (after an
//! index-proportional stagger) while capturing, powered off otherwise.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::{Camera, Frame};
use crate::actuators::LightingController;
use crate::capture::{CaptureDecision, Decision, DecisionPolicy};
use crate::detection::{Detector, detect_or_empty};
use crate::session::{CameraId, Mode, SessionState};
use crate::shutdown::Shutdown;
use crate::upload::{UploadHandle, UploadJob, UploadMetadata};

/// Timing for one camera's loop
#[derive(Debug, Clone, Copy)]
pub struct LifecycleSettings {
    /// Pause between frames (and between mode polls while idle)
    pub frame_interval: Duration,
    /// Power-on delay per camera index
    pub startup_stagger: Duration,
    /// Lighting deadline extension per captured frame
    pub frame_extension: Duration,
}

/// Drives one camera
pub struct CameraLifecycle {
    camera: Box<dyn Camera>,
    id: CameraId,
    state: Arc<SessionState>,
    detector: Arc<dyn Detector>,
    uploads: UploadHandle,
    lighting: Arc<LightingController>,
    decision: CaptureDecision,
    settings: LifecycleSettings,
    powered_on: bool,
    last_frame_time: Option<Instant>,
}

impl CameraLifecycle {
    #[must_use]
    pub fn new(
        camera: Box<dyn Camera>,
        state: Arc<SessionState>,
        detector: Arc<dyn Detector>,
        uploads: UploadHandle,
        lighting: Arc<LightingController>,
        policy: DecisionPolicy,
        settings: LifecycleSettings,
    ) -> Self {
        let id = camera.id();
        Self {
            camera,
            id,
            state,
            detector,
            uploads,
            lighting,
            decision: CaptureDecision::new(id, policy),
            settings,
            powered_on: false,
            last_frame_time: None,
        }
    }

    /// Whether the camera is currently powered
    #[must_use]
    pub const fn is_powered_on(&self) -> bool {
        self.powered_on
    }

    /// Run until shutdown, then power the camera off
    pub async fn run(mut self, mut shutdown: Shutdown) {
        tracing::debug!(camera = %self.id, "camera loop started");

        loop {
            tokio::select! {
                () = shutdown.recv() => break,
                () = tokio::time::sleep(self.settings.frame_interval) => {}
            }

            if self.state.mode() != Mode::Capturing {
                self.power_off().await;
                continue;
            }

            if !self.powered_on && !self.power_on(&mut shutdown).await {
                continue;
            }

            // Capture may block on hardware; stay responsive to shutdown
            let frame = tokio::select! {
                () = shutdown.recv() => break,
                frame = self.camera.capture() => frame,
            };

            match frame {
                Ok(frame) => {
                    self.lighting.extend(self.settings.frame_extension);
                    self.last_frame_time = Some(self.state.clock().now());
                    self.process(frame).await;
                }
                Err(e) => tracing::warn!(camera = %self.id, error = %e, "frame capture failed"),
            }
        }

        self.power_off().await;
        tracing::debug!(camera = %self.id, "camera loop stopped");
    }

    /// Staggered power-on; returns whether the camera is now powered
    async fn power_on(&mut self, shutdown: &mut Shutdown) -> bool {
        let steps = u32::try_from(self.id.index()).unwrap_or(u32::MAX);
        let delay = self.settings.startup_stagger.saturating_mul(steps);

        if !delay.is_zero() {
            tokio::select! {
                () = shutdown.recv() => return false,
                () = tokio::time::sleep(delay) => {}
            }
            if self.state.mode() != Mode::Capturing {
                return false;
            }
        }

        match self.camera.power_on().await {
            Ok(()) => {
                self.powered_on = true;
                tracing::info!(
                    camera = %self.id,
                    delay_ms = delay.as_millis(),
                    "camera powered on"
                );
                true
            }
            Err(e) => {
                tracing::warn!(camera = %self.id, error = %e, "camera power-on failed, retrying");
                false
            }
        }
    }

    async fn power_off(&mut self) {
        if !self.powered_on {
            return;
        }

        if let Err(e) = self.camera.power_off().await {
            tracing::warn!(camera = %self.id, error = %e, "camera power-off failed");
        }
        self.powered_on = false;
        tracing::info!(camera = %self.id, "camera powered off");
    }

    async fn process(&mut self, frame: Frame) {
        let Some(session) = self.state.capture_session(self.id) else {
            return;
        };
        if session.camera_completed {
            return;
        }

        let detections = detect_or_empty(self.detector.as_ref(), &frame).await;
        let now = self.state.clock().now();
        let decision = self
            .decision
            .evaluate(Some(&session), &detections, now, self.uploads.is_busy());

        match decision {
            Decision::Submit(trigger) => {
                let metadata = UploadMetadata::for_frame(&frame, &session);
                let job = UploadJob {
                    epoch: session.epoch,
                    frame,
                    metadata,
                };
                if let Err(e) = self.uploads.submit(job) {
                    tracing::debug!(
                        camera = %self.id,
                        ?trigger,
                        error = %e,
                        "upload not submitted"
                    );
                }
            }
            Decision::Skip(reason) => {
                tracing::trace!(
                    camera = %self.id,
                    ?reason,
                    score = detections.max_score(),
                    "frame skipped"
                );
            }
        }
    }
}

impl std::fmt::Debug for CameraLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraLifecycle")
            .field("id", &self.id)
            .field("powered_on", &self.powered_on)
            .field("last_frame_time", &self.last_frame_time)
            .finish_non_exhaustive()
    }
}
