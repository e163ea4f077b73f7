//! Return session state machine
//!
//! A single [`SessionState`] is shared by every task in the daemon. All
//! mutations go through the atomic operations below, each of which holds the
//! lock only for one check-and-mutate step. The mode cycles strictly
//! `Idle -> WaitForTag -> Capturing -> Idle`.

mod tracker;
mod watchdog;

pub use tracker::CompletionTracker;
pub use watchdog::Watchdog;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::clock::Clock;

/// Identifier of a physical camera (its index in the configured camera list)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CameraId(usize);

impl CameraId {
    /// Create a camera id from its index
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Index of this camera in the configured list
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cam{}", self.0)
    }
}

impl Serialize for CameraId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Session mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    /// No session in progress
    Idle,
    /// Start accepted, waiting for the credential tap
    WaitForTag,
    /// Credential matched, cameras capturing evidence
    Capturing,
}

impl Mode {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::WaitForTag => 1,
            Self::Capturing => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::WaitForTag,
            2 => Self::Capturing,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::WaitForTag => write!(f, "wait_for_tag"),
            Self::Capturing => write!(f, "capturing"),
        }
    }
}

/// Result of a start request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Session started, now waiting for the credential
    Accepted {
        /// Session epoch
        epoch: u64,
        /// Request id correlating the session to its trigger
        request_id: String,
    },
    /// A session is already waiting for its credential
    AlreadyWaiting,
    /// A session is capturing
    Busy,
}

/// Result of recording a camera's successful upload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionOutcome {
    /// The camera was added to the completion set by this call
    pub newly_completed: bool,
    /// The completion set now covers every camera; the session has been reset
    pub session_done: bool,
    /// Request id of the finished session (set only when `session_done`)
    pub request_id: Option<String>,
    /// Size of the completion set after this call
    pub completed: usize,
}

/// Session that the watchdog abandoned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredSession {
    /// Request id of the abandoned session
    pub request_id: Option<String>,
    /// Time spent capturing
    pub elapsed: Duration,
    /// Cameras that had completed before the timeout
    pub completed: usize,
}

/// What a camera needs to know about the current capture session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSession {
    /// Session epoch
    pub epoch: u64,
    /// Request id of the session
    pub request_id: Option<String>,
    /// Matched credential
    pub credential: String,
    /// Time capturing started
    pub started_at: Instant,
    /// This camera already uploaded successfully in this session
    pub camera_completed: bool,
}

/// Read-only copy of the session state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub mode: Mode,
    pub epoch: u64,
    pub request_id: Option<String>,
    pub credential: Option<String>,
    pub elapsed_ms: Option<u64>,
    pub completed_cameras: Vec<CameraId>,
    pub total_cameras: usize,
}

#[derive(Debug)]
struct Inner {
    mode: Mode,
    epoch: u64,
    request_id: Option<String>,
    credential: Option<String>,
    session_start: Option<Instant>,
    completed: BTreeSet<CameraId>,
}

impl Inner {
    fn reset(&mut self) {
        self.mode = Mode::Idle;
        self.request_id = None;
        self.credential = None;
        self.session_start = None;
        self.completed.clear();
    }
}

/// The single shared session record
pub struct SessionState {
    inner: Mutex<Inner>,
    /// Mirror of `inner.mode` for lock-free advisory reads
    mode: AtomicU8,
    total_cameras: usize,
    target_credential: String,
    clock: Arc<dyn Clock>,
}

impl SessionState {
    /// Create the session state in `Idle`
    #[must_use]
    pub fn new(total_cameras: usize, target_credential: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                mode: Mode::Idle,
                epoch: 0,
                request_id: None,
                credential: None,
                session_start: None,
                completed: BTreeSet::new(),
            }),
            mode: AtomicU8::new(Mode::Idle.as_u8()),
            total_cameras,
            target_credential: normalize_credential(target_credential),
            clock,
        }
    }

    /// Current mode without taking the lock
    ///
    /// Advisory only: the value may be one transition stale.
    #[must_use]
    pub fn mode(&self) -> Mode {
        Mode::from_u8(self.mode.load(Ordering::Acquire))
    }

    /// Configured camera count
    #[must_use]
    pub const fn total_cameras(&self) -> usize {
        self.total_cameras
    }

    /// Clock used for session timing
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Accept a start request if idle
    ///
    /// A missing request id is replaced with a generated one.
    pub fn try_start(&self, request_id: Option<String>) -> StartOutcome {
        let mut inner = self.lock();
        match inner.mode {
            Mode::WaitForTag => return StartOutcome::AlreadyWaiting,
            Mode::Capturing => return StartOutcome::Busy,
            Mode::Idle => {}
        }

        let request_id = request_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        inner.epoch += 1;
        inner.request_id = Some(request_id.clone());
        inner.credential = None;
        inner.session_start = None;
        inner.completed.clear();
        self.set_mode(&mut inner, Mode::WaitForTag);

        tracing::info!(
            epoch = inner.epoch,
            request_id = %request_id,
            "return session started, waiting for tag"
        );

        StartOutcome::Accepted {
            epoch: inner.epoch,
            request_id,
        }
    }

    /// Accept a credential if waiting for one and it matches the target
    pub fn try_authorize(&self, credential: &str) -> bool {
        let mut inner = self.lock();
        if inner.mode != Mode::WaitForTag {
            return false;
        }

        let observed = normalize_credential(credential);
        if observed.is_empty() || observed != self.target_credential {
            tracing::debug!(credential = %observed, "credential does not match target");
            return false;
        }

        inner.credential = Some(observed);
        inner.session_start = Some(self.clock.now());
        self.set_mode(&mut inner, Mode::Capturing);

        tracing::info!(
            epoch = inner.epoch,
            request_id = ?inner.request_id,
            "credential matched, capturing"
        );
        true
    }

    /// Record a camera's successful upload for the session `epoch`
    ///
    /// Stale epochs, unknown cameras, duplicates and calls outside `Capturing`
    /// are no-ops. When the set becomes full the session is reset to `Idle`
    /// in the same critical section.
    pub fn record_completion(&self, epoch: u64, camera: CameraId) -> CompletionOutcome {
        let mut inner = self.lock();
        if inner.mode != Mode::Capturing
            || inner.epoch != epoch
            || camera.index() >= self.total_cameras
        {
            tracing::debug!(%camera, epoch, current = inner.epoch, "ignoring stale completion");
            return CompletionOutcome::default();
        }

        let newly_completed = inner.completed.insert(camera);
        let completed = inner.completed.len();
        let session_done = completed >= self.total_cameras;

        let request_id = if session_done {
            let request_id = inner.request_id.clone();
            self.reset_locked(&mut inner);
            request_id
        } else {
            None
        };

        CompletionOutcome {
            newly_completed,
            session_done,
            request_id,
            completed,
        }
    }

    /// Unconditionally return to `Idle`, clearing all session fields
    ///
    /// Returns the mode that was active before the reset.
    pub fn force_reset(&self) -> Mode {
        let mut inner = self.lock();
        let previous = inner.mode;
        self.reset_locked(&mut inner);
        previous
    }

    /// Reset the session if it has been capturing for longer than `bound`
    pub fn expire_if_overrun(&self, bound: Duration) -> Option<ExpiredSession> {
        let mut inner = self.lock();
        if inner.mode != Mode::Capturing {
            return None;
        }

        let started = inner.session_start?;
        let elapsed = self.clock.now().saturating_duration_since(started);
        if elapsed <= bound {
            return None;
        }

        let expired = ExpiredSession {
            request_id: inner.request_id.clone(),
            elapsed,
            completed: inner.completed.len(),
        };
        self.reset_locked(&mut inner);
        Some(expired)
    }

    /// Capture session details for `camera`, if capturing
    #[must_use]
    pub fn capture_session(&self, camera: CameraId) -> Option<CaptureSession> {
        let inner = self.lock();
        if inner.mode != Mode::Capturing {
            return None;
        }

        Some(CaptureSession {
            epoch: inner.epoch,
            request_id: inner.request_id.clone(),
            credential: inner.credential.clone().unwrap_or_default(),
            started_at: inner.session_start?,
            camera_completed: inner.completed.contains(&camera),
        })
    }

    /// Whether `epoch` is the session currently capturing
    #[must_use]
    pub fn is_capturing_epoch(&self, epoch: u64) -> bool {
        let inner = self.lock();
        inner.mode == Mode::Capturing && inner.epoch == epoch
    }

    /// Read-only copy of the state
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.lock();
        let elapsed_ms = inner.session_start.map(|start| {
            u64::try_from(self.clock.now().saturating_duration_since(start).as_millis())
                .unwrap_or(u64::MAX)
        });

        SessionSnapshot {
            mode: inner.mode,
            epoch: inner.epoch,
            request_id: inner.request_id.clone(),
            credential: inner.credential.clone(),
            elapsed_ms,
            completed_cameras: inner.completed.iter().copied().collect(),
            total_cameras: self.total_cameras,
        }
    }

    fn reset_locked(&self, inner: &mut MutexGuard<'_, Inner>) {
        inner.reset();
        self.mode.store(Mode::Idle.as_u8(), Ordering::Release);
    }

    fn set_mode(&self, inner: &mut MutexGuard<'_, Inner>, mode: Mode) {
        inner.mode = mode;
        self.mode.store(mode.as_u8(), Ordering::Release);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("mode", &self.mode())
            .field("total_cameras", &self.total_cameras)
            .finish_non_exhaustive()
    }
}

/// Credentials are compared as trimmed uppercase hex
fn normalize_credential(value: &str) -> String {
    value.trim().to_ascii_uppercase()
}
