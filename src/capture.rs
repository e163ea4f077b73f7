//! Per-frame upload decision
//!
//! A frame qualifies for upload through either of two gates:
//! the detection confidence gate or the elapsed-time forced-send gate.
//! Each camera gets a bounded number of submissions per session; a failed
//! upload is retried by the next qualifying frame once the retry gap has
//! passed, so the budget stretches across the whole capture window.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tokio::time::Instant;

use crate::detection::Detections;
use crate::session::{CameraId, CaptureSession};
use crate::{Error, Result};

/// When the forced-send gate applies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ForcedSendPolicy {
    /// Once the bound elapses, regardless of detections
    #[default]
    Always,
    /// Once the bound elapses, only if nothing was detected this session
    NoDetections,
}

impl FromStr for ForcedSendPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "always" => Ok(Self::Always),
            "no_detections" => Ok(Self::NoDetections),
            other => Err(Error::Config(format!("unknown forced-send policy: {other}"))),
        }
    }
}

impl fmt::Display for ForcedSendPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "always"),
            Self::NoDetections => write!(f, "no_detections"),
        }
    }
}

/// Gate parameters shared by every camera
#[derive(Debug, Clone, Copy)]
pub struct DecisionPolicy {
    pub threshold: f32,
    pub forced_send_after: Duration,
    pub forced_send_policy: ForcedSendPolicy,
    pub max_attempts: u32,
    /// Minimum time between two submissions from one camera
    pub retry_gap: Duration,
}

/// Which gate qualified a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trigger {
    /// Best detection met the threshold
    Confidence { score: f32 },
    /// Forced-send bound elapsed
    Forced { elapsed: Duration },
}

/// Why a frame was not submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotCapturing,
    AlreadyCompleted,
    BelowThreshold,
    UploadInFlight,
    RetryBackoff,
    AttemptsExhausted,
}

/// Outcome of evaluating one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Submit(Trigger),
    Skip(SkipReason),
}

/// Decision state for one camera
#[derive(Debug)]
pub struct CaptureDecision {
    camera: CameraId,
    policy: DecisionPolicy,
    /// Session the counters below belong to
    epoch: Option<u64>,
    attempts: u32,
    last_attempt: Option<Instant>,
    saw_detection: bool,
}

impl CaptureDecision {
    #[must_use]
    pub const fn new(camera: CameraId, policy: DecisionPolicy) -> Self {
        Self {
            camera,
            policy,
            epoch: None,
            attempts: 0,
            last_attempt: None,
            saw_detection: false,
        }
    }

    /// Submissions made in the current session
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Evaluate one frame
    ///
    /// `session` is `None` when not capturing. `upload_busy` reports whether
    /// this camera already has an upload in flight. A `Submit` result
    /// consumes one attempt.
    pub fn evaluate(
        &mut self,
        session: Option<&CaptureSession>,
        detections: &Detections,
        now: Instant,
        upload_busy: bool,
    ) -> Decision {
        let Some(session) = session else {
            return Decision::Skip(SkipReason::NotCapturing);
        };

        if self.epoch != Some(session.epoch) {
            self.epoch = Some(session.epoch);
            self.attempts = 0;
            self.last_attempt = None;
            self.saw_detection = false;
        }

        if session.camera_completed {
            return Decision::Skip(SkipReason::AlreadyCompleted);
        }

        self.saw_detection |= !detections.is_empty();

        let Some(trigger) = self.trigger(session, detections, now) else {
            return Decision::Skip(SkipReason::BelowThreshold);
        };

        if upload_busy {
            return Decision::Skip(SkipReason::UploadInFlight);
        }

        if self.attempts >= self.policy.max_attempts {
            return Decision::Skip(SkipReason::AttemptsExhausted);
        }

        let gap = self.policy.retry_gap;
        if self.last_attempt.is_some_and(|last| now.saturating_duration_since(last) < gap) {
            return Decision::Skip(SkipReason::RetryBackoff);
        }

        self.attempts += 1;
        self.last_attempt = Some(now);
        tracing::debug!(
            camera = %self.camera,
            epoch = session.epoch,
            attempt = self.attempts,
            ?trigger,
            "frame qualifies for upload"
        );
        Decision::Submit(trigger)
    }

    fn trigger(
        &self,
        session: &CaptureSession,
        detections: &Detections,
        now: Instant,
    ) -> Option<Trigger> {
        let score = detections.max_score();
        if score >= self.policy.threshold {
            return Some(Trigger::Confidence { score });
        }

        let elapsed = now.saturating_duration_since(session.started_at);
        let forced_allowed = match self.policy.forced_send_policy {
            ForcedSendPolicy::Always => true,
            ForcedSendPolicy::NoDetections => !self.saw_detection,
        };

        (forced_allowed && elapsed >= self.policy.forced_send_after)
            .then_some(Trigger::Forced { elapsed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: DecisionPolicy = DecisionPolicy {
        threshold: 0.80,
        forced_send_after: Duration::from_secs(8),
        forced_send_policy: ForcedSendPolicy::Always,
        max_attempts: 3,
        retry_gap: Duration::from_secs(1),
    };

    fn session(epoch: u64, started_at: Instant) -> CaptureSession {
        CaptureSession {
            epoch,
            request_id: Some("req".to_string()),
            credential: "E2000017570D0173277006CB".to_string(),
            started_at,
            camera_completed: false,
        }
    }

    fn scored(score: f32) -> Detections {
        let mut detections = Detections::new();
        detections.insert("scooter", score);
        detections
    }

    #[test]
    fn confidence_gate_trips_at_threshold() {
        let start = Instant::now();
        let mut decision = CaptureDecision::new(CameraId::new(0), POLICY);
        let s = session(1, start);

        assert_eq!(
            decision.evaluate(Some(&s), &scored(0.79), start, false),
            Decision::Skip(SkipReason::BelowThreshold)
        );
        assert!(matches!(
            decision.evaluate(Some(&s), &scored(0.80), start, false),
            Decision::Submit(Trigger::Confidence { .. })
        ));
    }

    #[test]
    fn forced_gate_fires_after_bound() {
        let start = Instant::now();
        let mut decision = CaptureDecision::new(CameraId::new(1), POLICY);
        let s = session(1, start);

        let early = start + Duration::from_millis(7999);
        assert_eq!(
            decision.evaluate(Some(&s), &scored(0.4), early, false),
            Decision::Skip(SkipReason::BelowThreshold)
        );

        let due = start + Duration::from_secs(8);
        assert_eq!(
            decision.evaluate(Some(&s), &scored(0.4), due, false),
            Decision::Submit(Trigger::Forced { elapsed: Duration::from_secs(8) })
        );
    }

    #[test]
    fn no_detections_policy_blocks_forced_send_after_any_detection() {
        let start = Instant::now();
        let policy = DecisionPolicy {
            forced_send_policy: ForcedSendPolicy::NoDetections,
            ..POLICY
        };
        let late = start + Duration::from_secs(9);

        let mut quiet = CaptureDecision::new(CameraId::new(0), policy);
        assert!(matches!(
            quiet.evaluate(Some(&session(1, start)), &Detections::new(), late, false),
            Decision::Submit(Trigger::Forced { .. })
        ));

        let mut noisy = CaptureDecision::new(CameraId::new(0), policy);
        noisy.evaluate(Some(&session(1, start)), &scored(0.2), start, false);
        assert_eq!(
            noisy.evaluate(Some(&session(1, start)), &Detections::new(), late, false),
            Decision::Skip(SkipReason::BelowThreshold)
        );
    }

    #[test]
    fn attempts_are_bounded_per_session() {
        let start = Instant::now();
        let mut decision = CaptureDecision::new(CameraId::new(0), POLICY);
        let s = session(1, start);

        let mut now = start;
        for _ in 0..3 {
            assert!(matches!(
                decision.evaluate(Some(&s), &scored(0.9), now, false),
                Decision::Submit(_)
            ));
            now += POLICY.retry_gap;
        }
        assert_eq!(
            decision.evaluate(Some(&s), &scored(0.9), now, false),
            Decision::Skip(SkipReason::AttemptsExhausted)
        );

        // A new session starts with a fresh budget
        assert!(matches!(
            decision.evaluate(Some(&session(2, start)), &scored(0.9), now, false),
            Decision::Submit(_)
        ));
        assert_eq!(decision.attempts(), 1);
    }

    #[test]
    fn retries_wait_for_gap() {
        let start = Instant::now();
        let mut decision = CaptureDecision::new(CameraId::new(0), POLICY);
        let s = session(1, start);

        assert!(matches!(
            decision.evaluate(Some(&s), &scored(0.9), start, false),
            Decision::Submit(_)
        ));

        // Frames arriving during the gap leave the budget untouched
        for millis in [200, 400, 999] {
            let now = start + Duration::from_millis(millis);
            assert_eq!(
                decision.evaluate(Some(&s), &scored(0.9), now, false),
                Decision::Skip(SkipReason::RetryBackoff)
            );
        }
        assert_eq!(decision.attempts(), 1);

        assert!(matches!(
            decision.evaluate(Some(&s), &scored(0.9), start + POLICY.retry_gap, false),
            Decision::Submit(_)
        ));
        assert_eq!(decision.attempts(), 2);
    }

    #[test]
    fn busy_upload_does_not_consume_attempt() {
        let start = Instant::now();
        let mut decision = CaptureDecision::new(CameraId::new(0), POLICY);
        let s = session(1, start);

        assert_eq!(
            decision.evaluate(Some(&s), &scored(0.9), start, true),
            Decision::Skip(SkipReason::UploadInFlight)
        );
        assert_eq!(decision.attempts(), 0);
    }

    #[test]
    fn skips_outside_capture_and_after_completion() {
        let start = Instant::now();
        let mut decision = CaptureDecision::new(CameraId::new(0), POLICY);

        assert_eq!(
            decision.evaluate(None, &scored(0.99), start, false),
            Decision::Skip(SkipReason::NotCapturing)
        );

        let mut done = session(1, start);
        done.camera_completed = true;
        assert_eq!(
            decision.evaluate(Some(&done), &scored(0.99), start, false),
            Decision::Skip(SkipReason::AlreadyCompleted)
        );
    }

    #[test]
    fn policy_names_parse() {
        assert_eq!("always".parse::<ForcedSendPolicy>().unwrap(), ForcedSendPolicy::Always);
        assert_eq!(
            "No-Detections".parse::<ForcedSendPolicy>().unwrap(),
            ForcedSendPolicy::NoDetections
        );
        assert!("sometimes".parse::<ForcedSendPolicy>().is_err());
    }
}
