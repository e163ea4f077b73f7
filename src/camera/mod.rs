//! Cameras and their power lifecycle

mod command;
mod lifecycle;
mod synthetic;

pub use command::CommandCamera;
pub use lifecycle::{CameraLifecycle, LifecycleSettings};
pub use synthetic::SyntheticCamera;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use image::RgbImage;

use crate::Result;
use crate::session::CameraId;

/// One captured image
#[derive(Debug, Clone)]
pub struct Frame {
    pub camera: CameraId,
    pub image: RgbImage,
    /// Wall-clock capture time (used in upload file names)
    pub captured_at: DateTime<Local>,
}

impl Frame {
    /// Wrap an image captured now
    #[must_use]
    pub fn new(camera: CameraId, image: RgbImage) -> Self {
        Self {
            camera,
            image,
            captured_at: Local::now(),
        }
    }
}

/// A physical (or simulated) camera
///
/// Each camera is owned by exactly one [`CameraLifecycle`] task.
#[async_trait]
pub trait Camera: Send {
    /// Camera this handle drives
    fn id(&self) -> CameraId;

    /// Bring the sensor up
    ///
    /// # Errors
    ///
    /// Returns error if the camera does not respond
    async fn power_on(&mut self) -> Result<()>;

    /// Capture one frame
    ///
    /// # Errors
    ///
    /// Returns error if the capture fails
    async fn capture(&mut self) -> Result<Frame>;

    /// Release the sensor
    ///
    /// # Errors
    ///
    /// Returns error if the camera cannot be shut down cleanly
    async fn power_off(&mut self) -> Result<()>;
}
