//! Camera driven by an external still-capture command (`rpicam-still`)

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::{Camera, Frame};
use crate::session::CameraId;
use crate::{Error, Result};

/// Runs a capture command per frame and decodes its JPEG output
#[derive(Debug)]
pub struct CommandCamera {
    id: CameraId,
    program: String,
    args: Vec<String>,
    powered: bool,
}

impl CommandCamera {
    /// Create a camera from a command template
    ///
    /// `{index}` in the template is replaced with the camera index. The
    /// command must write a JPEG image to stdout.
    ///
    /// # Errors
    ///
    /// Returns error if the template is empty
    pub fn new(id: CameraId, template: &str) -> Result<Self> {
        let index = id.index().to_string();
        let mut parts = template
            .split_whitespace()
            .map(|part| part.replace("{index}", &index));

        let program = parts
            .next()
            .ok_or_else(|| Error::Config("camera capture command is empty".to_string()))?;

        Ok(Self {
            id,
            program,
            args: parts.collect(),
            powered: false,
        })
    }

    async fn run_capture(&self) -> Result<Frame> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                Error::Camera(format!("{}: failed to run {}: {e}", self.id, self.program))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Camera(format!(
                "{}: capture exited with {}: {}",
                self.id,
                output.status,
                stderr.trim()
            )));
        }

        let image = image::load_from_memory_with_format(&output.stdout, image::ImageFormat::Jpeg)?;
        Ok(Frame::new(self.id, image.to_rgb8()))
    }
}

#[async_trait]
impl Camera for CommandCamera {
    fn id(&self) -> CameraId {
        self.id
    }

    async fn power_on(&mut self) -> Result<()> {
        // A probe capture confirms the sensor is attached and responding
        self.run_capture().await?;
        self.powered = true;
        tracing::debug!(camera = %self.id, program = %self.program, "camera responding");
        Ok(())
    }

    async fn capture(&mut self) -> Result<Frame> {
        if !self.powered {
            return Err(Error::Camera(format!("{} is powered off", self.id)));
        }
        self.run_capture().await
    }

    async fn power_off(&mut self) -> Result<()> {
        self.powered = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_substitutes_index() {
        let camera =
            CommandCamera::new(CameraId::new(1), "rpicam-still --camera {index} -o -").unwrap();
        assert_eq!(camera.program, "rpicam-still");
        assert_eq!(camera.args, vec!["--camera", "1", "-o", "-"]);
    }

    #[test]
    fn empty_template_rejected() {
        assert!(CommandCamera::new(CameraId::new(0), "   ").is_err());
    }

    #[tokio::test]
    async fn missing_program_fails_power_on() {
        let mut camera =
            CommandCamera::new(CameraId::new(0), "/nonexistent/rpicam-still -o -").unwrap();
        assert!(matches!(camera.power_on().await, Err(Error::Camera(_))));
        assert!(camera.capture().await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_jpeg_output_is_error() {
        let mut camera = CommandCamera::new(CameraId::new(0), "echo not-a-jpeg").unwrap();
        assert!(camera.power_on().await.is_err());
    }
}
