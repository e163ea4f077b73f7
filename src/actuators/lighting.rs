//! Lighting relay held on until a rolling deadline
//!
//! Writers only ever push the deadline forward (max-accumulation), so camera
//! frames and the presence sensor extend it concurrently without a lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::gpio::OutputPin;
use crate::clock::Clock;
use crate::shutdown::Shutdown;

/// Lighting state for status reporting
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LightingStatus {
    /// Relay currently energized
    pub energized: bool,
    /// Milliseconds until the deadline passes (0 when expired)
    pub remaining_ms: u64,
}

/// Owns the lighting relay and its deadline
pub struct LightingController {
    /// Reference point for the stored deadline
    base: Instant,
    /// Deadline as milliseconds after `base`
    deadline_ms: AtomicU64,
    energized: AtomicBool,
    relay: Arc<dyn OutputPin>,
    clock: Arc<dyn Clock>,
}

impl LightingController {
    /// Create a controller with an already-expired deadline
    #[must_use]
    pub fn new(relay: Arc<dyn OutputPin>, clock: Arc<dyn Clock>) -> Self {
        Self {
            base: clock.now(),
            deadline_ms: AtomicU64::new(0),
            energized: AtomicBool::new(false),
            relay,
            clock,
        }
    }

    /// Keep the lights on for at least `by` from now
    ///
    /// Never moves the deadline backward. Returns the resulting deadline.
    pub fn extend(&self, by: Duration) -> Instant {
        let target = self.offset_ms(self.clock.now() + by);
        let previous = self.deadline_ms.fetch_max(target, Ordering::AcqRel);
        self.base + Duration::from_millis(previous.max(target))
    }

    /// Current deadline
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.base + Duration::from_millis(self.deadline_ms.load(Ordering::Acquire))
    }

    /// Whether the deadline is still in the future
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.clock.now() < self.deadline()
    }

    /// Relay state and time remaining
    #[must_use]
    pub fn status(&self) -> LightingStatus {
        let remaining = self.deadline().saturating_duration_since(self.clock.now());
        LightingStatus {
            energized: self.energized.load(Ordering::Acquire),
            remaining_ms: u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Drive the relay to match the deadline
    pub fn apply(&self) {
        self.switch(self.is_active());
    }

    /// Maintenance loop; forces the relay off on shutdown
    pub async fn run(self: Arc<Self>, poll: Duration, mut shutdown: Shutdown) {
        tracing::debug!(poll_ms = poll.as_millis(), "lighting loop started");

        loop {
            tokio::select! {
                () = shutdown.recv() => break,
                () = tokio::time::sleep(poll) => self.apply(),
            }
        }

        self.switch_off();
        tracing::debug!("lighting loop stopped");
    }

    /// Force the relay off regardless of the deadline
    pub fn switch_off(&self) {
        if let Err(e) = self.relay.set(false) {
            tracing::warn!(error = %e, "failed to switch lighting off");
        }
        self.energized.store(false, Ordering::Release);
    }

    fn switch(&self, on: bool) {
        if self.energized.load(Ordering::Acquire) == on {
            return;
        }

        match self.relay.set(on) {
            Ok(()) => {
                self.energized.store(on, Ordering::Release);
                tracing::debug!(on, "lighting relay switched");
            }
            Err(e) => tracing::warn!(on, error = %e, "failed to switch lighting relay"),
        }
    }

    fn offset_ms(&self, at: Instant) -> u64 {
        u64::try_from(at.saturating_duration_since(self.base).as_millis()).unwrap_or(u64::MAX)
    }
}

impl std::fmt::Debug for LightingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightingController")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
