//! In-process camera for bench runs and tests

use async_trait::async_trait;
use image::{Rgb, RgbImage};

use super::{Camera, Frame};
use crate::session::CameraId;
use crate::{Error, Result};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

/// Generates a gradient frame tinted per camera
#[derive(Debug)]
pub struct SyntheticCamera {
    id: CameraId,
    powered: bool,
    power_failures: u32,
    frames: u64,
}

impl SyntheticCamera {
    #[must_use]
    pub const fn new(id: CameraId) -> Self {
        Self {
            id,
            powered: false,
            power_failures: 0,
            frames: 0,
        }
    }

    /// Fail the next `count` power-on attempts
    #[must_use]
    pub const fn with_power_failures(mut self, count: u32) -> Self {
        self.power_failures = count;
        self
    }

    /// Frames captured so far
    #[must_use]
    pub const fn frames_captured(&self) -> u64 {
        self.frames
    }
}

#[async_trait]
impl Camera for SyntheticCamera {
    fn id(&self) -> CameraId {
        self.id
    }

    async fn power_on(&mut self) -> Result<()> {
        if self.power_failures > 0 {
            self.power_failures -= 1;
            return Err(Error::Camera(format!("{} did not respond", self.id)));
        }
        self.powered = true;
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    async fn capture(&mut self) -> Result<Frame> {
        if !self.powered {
            return Err(Error::Camera(format!("{} is powered off", self.id)));
        }

        self.frames += 1;
        let tint = (self.id.index() as u8).wrapping_mul(70);
        let shift = (self.frames % 256) as u8;
        let image = RgbImage::from_fn(WIDTH, HEIGHT, |x, y| {
            Rgb([
                (x * 4) as u8 ^ shift,
                (y * 5) as u8,
                tint,
            ])
        });

        Ok(Frame::new(self.id, image))
    }

    async fn power_off(&mut self) -> Result<()> {
        self.powered = false;
        Ok(())
    }
}
