//! Per-camera completion accounting

use std::sync::Arc;

use super::{CameraId, CompletionOutcome, SessionState};
use crate::actuators::{Pattern, SoundPlayer, play_best_effort};
use crate::notify::{CompletionNotice, CompletionPublisher};

/// Turns successful uploads into session completion
#[derive(Clone)]
pub struct CompletionTracker {
    state: Arc<SessionState>,
    publisher: CompletionPublisher,
    sound: Arc<dyn SoundPlayer>,
}

impl CompletionTracker {
    #[must_use]
    pub fn new(
        state: Arc<SessionState>,
        publisher: CompletionPublisher,
        sound: Arc<dyn SoundPlayer>,
    ) -> Self {
        Self {
            state,
            publisher,
            sound,
        }
    }

    /// Record that `camera` uploaded successfully for session `epoch`
    ///
    /// When this completes the set, the session is already back in `Idle`
    /// by the time the notice goes out, so exactly one notice is published.
    pub async fn on_upload_success(&self, epoch: u64, camera: CameraId) -> CompletionOutcome {
        let outcome = self.state.record_completion(epoch, camera);

        if outcome.newly_completed {
            tracing::info!(
                %camera,
                completed = outcome.completed,
                total = self.state.total_cameras(),
                "camera evidence recorded"
            );
        }

        if outcome.session_done {
            let request_id = outcome.request_id.clone().unwrap_or_default();
            tracing::info!(request_id = %request_id, "return complete");

            self.publisher
                .publish(CompletionNotice::success(&request_id))
                .await;
            play_best_effort(self.sound.as_ref(), Pattern::Complete).await;
        }

        outcome
    }

    /// Publisher used for completion notices
    #[must_use]
    pub const fn publisher(&self) -> &CompletionPublisher {
        &self.publisher
    }
}

impl std::fmt::Debug for CompletionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionTracker")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
