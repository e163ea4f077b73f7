//! Presence (PIR) sensor keeping the lights on while someone is at the kiosk

use std::sync::Arc;
use std::time::Duration;

use super::gpio::InputPin;
use super::lighting::LightingController;
use crate::shutdown::Shutdown;

/// Poll the sensor and extend the lighting deadline on motion
pub async fn run(
    sensor: Arc<dyn InputPin>,
    lighting: Arc<LightingController>,
    extension: Duration,
    poll: Duration,
    mut shutdown: Shutdown,
) {
    let mut was_detected = false;
    let mut read_failing = false;

    loop {
        tokio::select! {
            () = shutdown.recv() => break,
            () = tokio::time::sleep(poll) => {}
        }

        match sensor.read() {
            Ok(detected) => {
                read_failing = false;
                if detected {
                    lighting.extend(extension);
                    if !was_detected {
                        tracing::debug!("motion detected");
                    }
                }
                was_detected = detected;
            }
            Err(e) => {
                // Log once per failure streak
                if !read_failing {
                    tracing::warn!(error = %e, "presence sensor read failed");
                }
                read_failing = true;
            }
        }
    }

    tracing::debug!("presence loop stopped");
}
