//! Credential intake
//!
//! Observed credentials (from the tag reader or the HTTP API) pass through
//! the [`CredentialGate`], which only moves a waiting session to capturing.

pub mod yrm100;

use std::sync::Arc;

use crate::actuators::{Pattern, SoundPlayer, play_best_effort};
use crate::session::SessionState;

/// Accepts the configured credential while a session waits for it
#[derive(Clone)]
pub struct CredentialGate {
    state: Arc<SessionState>,
    sound: Arc<dyn SoundPlayer>,
}

impl CredentialGate {
    #[must_use]
    pub fn new(state: Arc<SessionState>, sound: Arc<dyn SoundPlayer>) -> Self {
        Self { state, sound }
    }

    /// Offer an observed credential; returns whether capture started
    pub async fn observe(&self, credential: &str) -> bool {
        if !self.state.try_authorize(credential) {
            return false;
        }

        play_best_effort(self.sound.as_ref(), Pattern::Authorized).await;
        true
    }
}

impl std::fmt::Debug for CredentialGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialGate")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
