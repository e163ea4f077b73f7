//! Object detection results and backends
//!
//! Every backend produces the same typed [`Detections`] map, so capture
//! decisions never need to inspect backend-specific result shapes.

mod http;

pub use http::HttpDetector;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::camera::Frame;

/// One detected object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub score: f32,
}

/// Label to best confidence for one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detections {
    scores: HashMap<String, f32>,
}

impl Detections {
    /// No detections
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a detection, keeping the best score per label
    ///
    /// Scores are clamped to `0..=1`; NaN scores are dropped.
    pub fn insert(&mut self, label: impl Into<String>, score: f32) {
        if score.is_nan() {
            return;
        }
        let score = score.clamp(0.0, 1.0);
        let entry = self.scores.entry(label.into()).or_insert(score);
        *entry = entry.max(score);
    }

    /// Highest confidence across all labels (0 when empty)
    #[must_use]
    pub fn max_score(&self) -> f32 {
        self.scores.values().copied().fold(0.0, f32::max)
    }

    /// Confidence for `label`
    #[must_use]
    pub fn score(&self, label: &str) -> Option<f32> {
        self.scores.get(label).copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }
}

impl FromIterator<Detection> for Detections {
    fn from_iter<I: IntoIterator<Item = Detection>>(iter: I) -> Self {
        let mut detections = Self::new();
        for d in iter {
            detections.insert(d.label, d.score);
        }
        detections
    }
}

/// Produces detections for a frame
#[async_trait]
pub trait Detector: Send + Sync {
    /// Run detection on `frame`
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails; callers treat this as an empty
    /// result
    async fn detect(&self, frame: &Frame) -> Result<Detections>;
}

/// Detector that never sees anything
///
/// Sessions then progress through the forced-send gate alone.
#[derive(Debug, Default)]
pub struct NullDetector;

#[async_trait]
impl Detector for NullDetector {
    async fn detect(&self, _frame: &Frame) -> Result<Detections> {
        Ok(Detections::new())
    }
}

/// Run detection, absorbing failures into an empty result
pub async fn detect_or_empty(detector: &dyn Detector, frame: &Frame) -> Detections {
    match detector.detect(frame).await {
        Ok(detections) => detections,
        Err(e) => {
            tracing::warn!(
                camera = %frame.camera,
                error = %e,
                "detection failed, treating frame as empty"
            );
            Detections::new()
        }
    }
}
