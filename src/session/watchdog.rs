//! Hard bound on time spent capturing

use std::sync::Arc;
use std::time::Duration;

use super::{ExpiredSession, SessionState};
use crate::actuators::{Pattern, SoundPlayer, play_best_effort};
use crate::shutdown::Shutdown;

/// Abandons sessions that overrun the capture bound
pub struct Watchdog {
    state: Arc<SessionState>,
    bound: Duration,
    poll: Duration,
    sound: Arc<dyn SoundPlayer>,
}

impl Watchdog {
    #[must_use]
    pub fn new(
        state: Arc<SessionState>,
        bound: Duration,
        poll: Duration,
        sound: Arc<dyn SoundPlayer>,
    ) -> Self {
        Self {
            state,
            bound,
            poll,
            sound,
        }
    }

    /// Run one check, resetting the session if it has overrun
    pub async fn check(&self) -> Option<ExpiredSession> {
        let expired = self.state.expire_if_overrun(self.bound)?;

        tracing::warn!(
            request_id = ?expired.request_id,
            elapsed_ms = expired.elapsed.as_millis(),
            completed = expired.completed,
            total = self.state.total_cameras(),
            "session timed out, resetting to idle"
        );
        play_best_effort(self.sound.as_ref(), Pattern::Aborted).await;

        Some(expired)
    }

    /// Poll until shutdown
    pub async fn run(self, mut shutdown: Shutdown) {
        tracing::debug!(bound_ms = self.bound.as_millis(), "watchdog started");

        loop {
            tokio::select! {
                () = shutdown.recv() => break,
                () = tokio::time::sleep(self.poll) => {
                    self.check().await;
                }
            }
        }

        tracing::debug!("watchdog stopped");
    }
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("bound", &self.bound)
            .field("poll", &self.poll)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuators::NoopSound;
    use crate::clock::SystemClock;
    use crate::session::Mode;

    const TAG: &str = "E2000017570D0173277006CB";

    #[tokio::test(start_paused = true)]
    async fn resets_overrun_session() {
        let state = Arc::new(SessionState::new(2, TAG, Arc::new(SystemClock)));
        let watchdog = Watchdog::new(
            Arc::clone(&state),
            Duration::from_secs(15),
            Duration::from_millis(250),
            Arc::new(NoopSound),
        );
        let (trigger, shutdown) = crate::shutdown::channel();
        let task = tokio::spawn(watchdog.run(shutdown));

        state.try_start(None);
        assert!(state.try_authorize(TAG));

        tokio::time::sleep(Duration::from_secs(14)).await;
        assert_eq!(state.mode(), Mode::Capturing);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(state.mode(), Mode::Idle);

        trigger.trigger();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn idle_check_is_noop() {
        let state = Arc::new(SessionState::new(1, TAG, Arc::new(SystemClock)));
        let watchdog = Watchdog::new(
            Arc::clone(&state),
            Duration::ZERO,
            Duration::from_millis(10),
            Arc::new(NoopSound),
        );
        assert!(watchdog.check().await.is_none());
    }
}
