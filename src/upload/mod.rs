//! Evidence upload
//!
//! Each camera has one worker task fed by a single-slot queue, so at most
//! one upload per camera is in flight and submissions never block the frame
//! loop. There is no internal retry: a failed upload frees the slot and the
//! next qualifying frame is resubmitted.

mod encode;
mod http;

pub use encode::encode_jpeg;
pub use http::HttpUploader;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::camera::Frame;
use crate::session::{CameraId, CaptureSession, CompletionTracker, SessionState};
use crate::shutdown::Shutdown;
use crate::{Error, Result};

/// Status field sent with every upload
pub const RETURN_STATUS: &str = "return_complete";

/// Form fields accompanying an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
    /// Camera name (`cam0`, `cam1`, ...)
    pub camera: String,
    /// Credential that authorized the session
    pub credential: String,
    pub request_id: Option<String>,
    pub status: String,
    pub captured_at: DateTime<Local>,
}

impl UploadMetadata {
    /// Metadata for a frame captured during `session`
    #[must_use]
    pub fn for_frame(frame: &Frame, session: &CaptureSession) -> Self {
        Self {
            camera: frame.camera.to_string(),
            credential: session.credential.clone(),
            request_id: session.request_id.clone(),
            status: RETURN_STATUS.to_string(),
            captured_at: frame.captured_at,
        }
    }

    /// Upload file name: `{camera}_RETURN_{YYYYmmdd_HHMMSS}.jpg`
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}_RETURN_{}.jpg", self.camera, self.captured_at.format("%Y%m%d_%H%M%S"))
    }
}

/// Transfers one encoded frame
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Send `jpeg` with `metadata`
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or a non-2xx response
    async fn send(&self, jpeg: Vec<u8>, metadata: &UploadMetadata) -> Result<()>;
}

/// A frame chosen for upload
#[derive(Debug)]
pub struct UploadJob {
    /// Session the frame belongs to
    pub epoch: u64,
    pub frame: Frame,
    pub metadata: UploadMetadata,
}

/// Submission side of one camera's upload worker
#[derive(Debug, Clone)]
pub struct UploadHandle {
    camera: CameraId,
    tx: mpsc::Sender<UploadJob>,
    busy: Arc<AtomicBool>,
}

impl UploadHandle {
    /// Whether an upload is queued or in flight
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Hand a job to the worker without waiting
    ///
    /// # Errors
    ///
    /// Returns `Error::Upload` if an upload is already in flight or the
    /// worker has stopped
    pub fn submit(&self, job: UploadJob) -> Result<()> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Upload(format!("{} upload already in flight", self.camera)));
        }

        if let Err(e) = self.tx.try_send(job) {
            self.busy.store(false, Ordering::Release);
            return Err(Error::Upload(format!("{} upload worker unavailable: {e}", self.camera)));
        }

        Ok(())
    }
}

/// Settings shared by every upload worker
#[derive(Clone)]
pub struct UploadContext {
    pub uploader: Arc<dyn Uploader>,
    pub state: Arc<SessionState>,
    pub tracker: CompletionTracker,
    pub jpeg_quality: u8,
}

/// Fixed pool of per-camera upload workers
#[derive(Debug)]
pub struct UploadDispatcher {
    handles: Vec<UploadHandle>,
    workers: Vec<JoinHandle<()>>,
}

impl UploadDispatcher {
    /// Spawn one worker per camera
    #[must_use]
    pub fn spawn(cameras: usize, context: &UploadContext, shutdown: &Shutdown) -> Self {
        let mut handles = Vec::with_capacity(cameras);
        let mut workers = Vec::with_capacity(cameras);

        for index in 0..cameras {
            let camera = CameraId::new(index);
            let (tx, rx) = mpsc::channel(1);
            let busy = Arc::new(AtomicBool::new(false));

            let worker = Worker {
                camera,
                rx,
                busy: Arc::clone(&busy),
                context: context.clone(),
            };
            workers.push(tokio::spawn(worker.run(shutdown.clone())));
            handles.push(UploadHandle { camera, tx, busy });
        }

        Self { handles, workers }
    }

    /// Submission handle for `camera`
    #[must_use]
    pub fn handle(&self, camera: CameraId) -> Option<UploadHandle> {
        self.handles.get(camera.index()).cloned()
    }

    /// Wait for every worker to exit
    pub async fn join(self) {
        drop(self.handles);
        for result in futures::future::join_all(self.workers).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "upload worker panicked");
            }
        }
    }
}

struct Worker {
    camera: CameraId,
    rx: mpsc::Receiver<UploadJob>,
    busy: Arc<AtomicBool>,
    context: UploadContext,
}

impl Worker {
    async fn run(mut self, mut shutdown: Shutdown) {
        loop {
            let job = tokio::select! {
                () = shutdown.recv() => break,
                job = self.rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let uploaded = tokio::select! {
                () = shutdown.recv() => {
                    tracing::info!(camera = %self.camera, "upload cancelled by shutdown");
                    break;
                }
                uploaded = self.upload(job) => uploaded,
            };

            // Not cancellable: the session is already reset once this starts
            if let Some(epoch) = uploaded {
                self.context.tracker.on_upload_success(epoch, self.camera).await;
            }

            self.busy.store(false, Ordering::Release);
        }

        self.busy.store(false, Ordering::Release);
        tracing::debug!(camera = %self.camera, "upload worker stopped");
    }

    /// Encode and send one job; returns the session epoch on success
    async fn upload(&self, job: UploadJob) -> Option<u64> {
        let UploadJob { epoch, frame, metadata } = job;

        if !self.context.state.is_capturing_epoch(epoch) {
            tracing::debug!(
                camera = %self.camera,
                epoch,
                "session ended before upload, dropping frame"
            );
            return None;
        }

        let quality = self.context.jpeg_quality;
        let encoded = tokio::task::spawn_blocking(move || encode_jpeg(&frame.image, quality)).await;
        let jpeg = match encoded {
            Ok(Ok(jpeg)) => jpeg,
            Ok(Err(e)) => {
                tracing::warn!(camera = %self.camera, error = %e, "failed to encode frame");
                return None;
            }
            Err(e) => {
                tracing::error!(camera = %self.camera, error = %e, "encode task failed");
                return None;
            }
        };

        let bytes = jpeg.len();
        match self.context.uploader.send(jpeg, &metadata).await {
            Ok(()) => {
                tracing::info!(
                    camera = %self.camera,
                    bytes,
                    file = %metadata.file_name(),
                    "evidence uploaded"
                );
                Some(epoch)
            }
            Err(e) => {
                tracing::warn!(
                    camera = %self.camera,
                    error = %e,
                    "upload failed, next qualifying frame will retry"
                );
                None
            }
        }
    }
}
