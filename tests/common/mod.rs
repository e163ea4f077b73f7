//! Shared test utilities
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scooter_dock::actuators::{LightingController, MemoryPin, Pattern, SoundPlayer};
use scooter_dock::camera::{CameraLifecycle, Frame, LifecycleSettings, SyntheticCamera};
use scooter_dock::capture::{DecisionPolicy, ForcedSendPolicy};
use scooter_dock::clock::SystemClock;
use scooter_dock::credential::CredentialGate;
use scooter_dock::detection::{Detections, Detector};
use scooter_dock::notify::{CompletionNotice, CompletionPublisher, Notifier};
use scooter_dock::session::{CameraId, CompletionTracker, SessionState, Watchdog};
use scooter_dock::shutdown::{self, ShutdownTrigger};
use scooter_dock::upload::{UploadContext, UploadDispatcher, UploadMetadata, Uploader};
use scooter_dock::{Error, Result};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Credential accepted by test sessions
pub const TARGET: &str = "E2000017570D0173277006CB";

/// Detector returning a fixed score per camera index
pub struct ScriptedDetector {
    scores: Vec<f32>,
}

impl ScriptedDetector {
    pub fn new(scores: Vec<f32>) -> Self {
        Self { scores }
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    async fn detect(&self, frame: &Frame) -> Result<Detections> {
        let mut detections = Detections::new();
        if let Some(score) = self.scores.get(frame.camera.index()) {
            detections.insert("scooter", *score);
        }
        Ok(detections)
    }
}

/// One upload attempt seen by [`RecordingUploader`]
#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub metadata: UploadMetadata,
    pub at: Instant,
    pub bytes: usize,
}

/// Uploader that records attempts and can be told to fail
#[derive(Default)]
pub struct RecordingUploader {
    records: Mutex<Vec<UploadRecord>>,
    failing: std::sync::atomic::AtomicBool,
}

impl RecordingUploader {
    pub fn failing() -> Self {
        let uploader = Self::default();
        uploader.failing.store(true, std::sync::atomic::Ordering::SeqCst);
        uploader
    }

    /// Start or stop failing subsequent uploads
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<UploadRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn for_camera(&self, camera: &str) -> Vec<UploadRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.metadata.camera == camera)
            .collect()
    }
}

#[async_trait]
impl Uploader for RecordingUploader {
    async fn send(&self, jpeg: Vec<u8>, metadata: &UploadMetadata) -> Result<()> {
        self.records.lock().unwrap().push(UploadRecord {
            metadata: metadata.clone(),
            at: Instant::now(),
            bytes: jpeg.len(),
        });

        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Upload("server returned 503".to_string()));
        }
        Ok(())
    }
}

/// Notifier that keeps every notice
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<CompletionNotice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<CompletionNotice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notice: &CompletionNotice) -> Result<()> {
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

/// Sound player that records patterns instead of playing them
#[derive(Default)]
pub struct RecordingSound {
    played: Mutex<Vec<Pattern>>,
}

impl RecordingSound {
    pub fn played(&self) -> Vec<Pattern> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl SoundPlayer for RecordingSound {
    async fn play(&self, pattern: Pattern) -> Result<()> {
        self.played.lock().unwrap().push(pattern);
        Ok(())
    }
}

/// Kiosk timings used by the pipeline tests
pub fn kiosk_policy() -> DecisionPolicy {
    DecisionPolicy {
        threshold: 0.80,
        forced_send_after: Duration::from_secs(8),
        forced_send_policy: ForcedSendPolicy::Always,
        max_attempts: 10,
        retry_gap: Duration::from_millis(1500),
    }
}

pub fn kiosk_settings() -> LifecycleSettings {
    LifecycleSettings {
        frame_interval: Duration::from_millis(200),
        startup_stagger: Duration::from_millis(1000),
        frame_extension: Duration::from_secs(2),
    }
}

/// The full capture pipeline over synthetic cameras
pub struct Harness {
    pub state: Arc<SessionState>,
    pub gate: CredentialGate,
    pub lighting: Arc<LightingController>,
    pub relay: Arc<MemoryPin>,
    pub uploader: Arc<RecordingUploader>,
    pub notifier: Arc<RecordingNotifier>,
    pub sound: Arc<RecordingSound>,
    trigger: ShutdownTrigger,
    tasks: Vec<JoinHandle<()>>,
    dispatcher: Option<UploadDispatcher>,
}

impl Harness {
    /// Spawn lifecycles, uploads, lighting and the 15 s watchdog
    pub fn start(scores: Vec<f32>, uploader: RecordingUploader) -> Self {
        let cameras = scores.len();
        let (trigger, shutdown) = shutdown::channel();
        let clock = Arc::new(SystemClock);

        let state = Arc::new(SessionState::new(cameras, TARGET, clock.clone()));
        let sound = Arc::new(RecordingSound::default());
        let relay = Arc::new(MemoryPin::new());
        let lighting = Arc::new(LightingController::new(relay.clone(), clock));
        let uploader = Arc::new(uploader);
        let notifier = Arc::new(RecordingNotifier::default());

        let tracker = CompletionTracker::new(
            state.clone(),
            CompletionPublisher::new(notifier.clone()),
            sound.clone(),
        );
        let dispatcher = UploadDispatcher::spawn(
            cameras,
            &UploadContext {
                uploader: uploader.clone(),
                state: state.clone(),
                tracker,
                jpeg_quality: 80,
            },
            &shutdown,
        );

        let detector: Arc<dyn Detector> = Arc::new(ScriptedDetector::new(scores));
        let mut tasks = Vec::new();

        for index in 0..cameras {
            let id = CameraId::new(index);
            let lifecycle = CameraLifecycle::new(
                Box::new(SyntheticCamera::new(id)),
                state.clone(),
                detector.clone(),
                dispatcher.handle(id).unwrap(),
                lighting.clone(),
                kiosk_policy(),
                kiosk_settings(),
            );
            tasks.push(tokio::spawn(lifecycle.run(shutdown.clone())));
        }

        let watchdog = Watchdog::new(
            state.clone(),
            Duration::from_secs(15),
            Duration::from_millis(250),
            sound.clone(),
        );
        tasks.push(tokio::spawn(watchdog.run(shutdown.clone())));
        tasks.push(tokio::spawn(
            lighting.clone().run(Duration::from_millis(100), shutdown),
        ));

        let gate = CredentialGate::new(state.clone(), sound.clone());

        Self {
            state,
            gate,
            lighting,
            relay,
            uploader,
            notifier,
            sound,
            trigger,
            tasks,
            dispatcher: Some(dispatcher),
        }
    }

    /// Start a session and present the target tag; returns the capture start
    pub async fn begin(&self, request_id: &str) -> Instant {
        self.state.try_start(Some(request_id.to_string()));
        assert!(self.gate.observe(TARGET).await, "target tag must start capture");
        Instant::now()
    }

    /// Stop every task
    pub async fn stop(mut self) {
        self.trigger.trigger();
        for task in self.tasks.drain(..) {
            task.await.unwrap();
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.join().await;
        }
    }
}
