//! Scooter Dock - return kiosk for shared scooters
//!
//! This library provides the core functionality for the dock daemon:
//! - Return session state machine (idle, waiting for a tag, capturing)
//! - Per-camera capture, detection and upload pipeline
//! - Completion tracking, notification and the capture watchdog
//! - Lighting relay, presence sensor, sound feedback and the UHF tag reader
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                       Inputs                         │
//! │   HTTP API (/return_start)  │  YRM100 tag reader     │
//! └────────────────────┬─────────────────────────────────┘
//!                      │
//! ┌────────────────────▼─────────────────────────────────┐
//! │                  SessionState                        │
//! │   IDLE ──▶ WAIT_FOR_TAG ──▶ CAPTURING ──▶ IDLE      │
//! └────────────────────┬─────────────────────────────────┘
//!                      │
//! ┌────────────────────▼─────────────────────────────────┐
//! │   Camera lifecycles ─▶ CaptureDecision ─▶ Uploads    │
//! │   CompletionTracker  │  Watchdog  │  Lighting/Sound  │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod actuators;
pub mod api;
pub mod camera;
pub mod capture;
pub mod clock;
pub mod config;
pub mod credential;
pub mod daemon;
pub mod detection;
pub mod error;
pub mod lifecycle;
pub mod notify;
pub mod session;
pub mod shutdown;
pub mod upload;

pub use actuators::{LightingController, Pattern, SoundPlayer};
pub use camera::{Camera, CameraLifecycle, Frame};
pub use capture::{CaptureDecision, Decision, DecisionPolicy, ForcedSendPolicy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use credential::CredentialGate;
pub use daemon::Daemon;
pub use detection::{Detections, Detector};
pub use error::{Error, Result};
pub use notify::{CompletionNotice, CompletionPublisher, Notifier};
pub use session::{CameraId, CompletionTracker, Mode, SessionState, Watchdog};
pub use upload::{UploadDispatcher, Uploader};
