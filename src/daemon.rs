//! Daemon - the kiosk service
//!
//! Wires the session state, cameras, upload workers, actuators, tag reader
//! and HTTP API together and runs them until interrupted

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::actuators::{
    CpalSound, LightingController, NoopSound, SoundPlayer, gpio, presence,
};
use crate::api::{ApiServerBuilder, ApiState};
use crate::camera::{Camera, CameraLifecycle, CommandCamera, LifecycleSettings, SyntheticCamera};
use crate::capture::DecisionPolicy;
use crate::clock::{Clock, SystemClock};
use crate::config::CameraBackend;
use crate::credential::{CredentialGate, yrm100};
use crate::detection::{Detector, HttpDetector, NullDetector};
use crate::notify::{CompletionPublisher, LogNotifier, Notifier, WebhookNotifier};
use crate::session::{CameraId, CompletionTracker, SessionState, Watchdog};
use crate::shutdown::{self, ShutdownTrigger};
use crate::upload::{HttpUploader, UploadContext, UploadDispatcher, Uploader};
use crate::{Config, Error, Result};

/// The dock daemon
pub struct Daemon {
    config: Config,
}

impl Daemon {
    /// Create a new daemon instance
    ///
    /// # Errors
    ///
    /// Returns error if the configuration fails validation
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Run the daemon until ctrl-c or SIGTERM
    ///
    /// # Errors
    ///
    /// Returns error if a component cannot be constructed
    pub async fn run(self) -> Result<()> {
        let (trigger, _) = shutdown::channel();

        let signal_trigger = trigger.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("shutdown requested");
            signal_trigger.trigger();
        });

        self.run_until(trigger).await
    }

    /// Run the daemon until `trigger` fires
    ///
    /// # Errors
    ///
    /// Returns error if a component cannot be constructed or the API
    /// server fails
    #[allow(clippy::too_many_lines)]
    pub async fn run_until(self, trigger: ShutdownTrigger) -> Result<()> {
        let config = self.config;
        let mut shutdown = trigger.subscribe();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        // Fallible construction first, before any task is spawned
        let notifier = build_notifier(&config)?;
        let detector = build_detector(&config)?;
        let uploader: Arc<dyn Uploader> = Arc::new(HttpUploader::new(
            config.upload.url.clone(),
            config.upload.timeout,
            config.upload.accept_invalid_certs,
        )?);
        let cameras = (0..config.cameras.count)
            .map(|index| build_camera(&config, CameraId::new(index)))
            .collect::<Result<Vec<_>>>()?;

        let state = Arc::new(SessionState::new(
            config.cameras.count,
            &config.session.target_credential,
            Arc::clone(&clock),
        ));
        let sound = build_sound(&config);

        // Lighting relay and presence sensor
        let relay = gpio::output_or_noop(
            &config.lighting.gpio_root,
            config.lighting.relay_pin,
            config.lighting.active_high,
        );
        let lighting = Arc::new(LightingController::new(relay, Arc::clone(&clock)));

        let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

        tasks.push((
            "lighting",
            tokio::spawn(Arc::clone(&lighting).run(config.lighting.poll, shutdown.clone())),
        ));

        if config.presence.enabled {
            if let Some(sensor) = gpio::input_or_none(
                &config.lighting.gpio_root,
                config.presence.sensor_pin,
                config.presence.active_high,
            ) {
                tasks.push((
                    "presence",
                    tokio::spawn(presence::run(
                        sensor,
                        Arc::clone(&lighting),
                        config.presence.extension,
                        config.presence.poll,
                        shutdown.clone(),
                    )),
                ));
            }
        }

        // Completion and upload pipeline
        let publisher = CompletionPublisher::new(notifier);
        let completions = publisher.subscribe();
        let tracker = CompletionTracker::new(Arc::clone(&state), publisher, Arc::clone(&sound));
        let dispatcher = UploadDispatcher::spawn(
            config.cameras.count,
            &UploadContext {
                uploader,
                state: Arc::clone(&state),
                tracker,
                jpeg_quality: config.cameras.jpeg_quality,
            },
            &shutdown,
        );

        // Cameras
        let policy = DecisionPolicy {
            threshold: config.session.threshold,
            forced_send_after: config.session.forced_send_after,
            forced_send_policy: config.session.forced_send_policy,
            max_attempts: config.session.max_attempts,
            retry_gap: config.session.retry_gap,
        };
        let settings = LifecycleSettings {
            frame_interval: config.cameras.frame_interval,
            startup_stagger: config.cameras.startup_stagger,
            frame_extension: config.lighting.frame_extension,
        };

        for camera in cameras {
            let Some(uploads) = dispatcher.handle(camera.id()) else {
                tracing::error!(camera = %camera.id(), "no upload worker for camera");
                continue;
            };

            let lifecycle = CameraLifecycle::new(
                camera,
                Arc::clone(&state),
                Arc::clone(&detector),
                uploads,
                Arc::clone(&lighting),
                policy,
                settings,
            );
            tasks.push(("camera", tokio::spawn(lifecycle.run(shutdown.clone()))));
        }

        // Session watchdog
        let watchdog = Watchdog::new(
            Arc::clone(&state),
            config.session.watchdog_bound,
            config.session.watchdog_poll,
            Arc::clone(&sound),
        );
        tasks.push(("watchdog", tokio::spawn(watchdog.run(shutdown.clone()))));

        // Credential sources
        let gate = CredentialGate::new(Arc::clone(&state), Arc::clone(&sound));
        if config.reader.enabled {
            let reader = yrm100::ReaderSettings::from(&config.reader);
            tasks.push((
                "reader",
                tokio::spawn(yrm100::run(reader, gate.clone(), shutdown.clone())),
            ));
        } else {
            tracing::info!("tag reader disabled, credentials accepted over HTTP only");
        }

        let api = ApiServerBuilder::new(ApiState {
            session: Arc::clone(&state),
            gate,
            lighting: Arc::clone(&lighting),
            sound,
            completions,
        })
        .bind(config.server.bind.clone())
        .port(config.server.port)
        .build();
        let mut api_task = api.spawn(shutdown.clone());

        tracing::info!(
            cameras = config.cameras.count,
            backend = ?config.cameras.backend,
            port = config.server.port,
            "dock ready"
        );

        // The API server only returns early on failure (e.g. port in use)
        let api_result = tokio::select! {
            () = shutdown.recv() => api_task.await,
            result = &mut api_task => {
                tracing::error!("API server stopped unexpectedly, shutting down");
                result
            }
        };

        trigger.trigger();
        for (name, handle) in tasks {
            if let Err(e) = handle.await {
                tracing::error!(task = name, error = %e, "task panicked");
            }
        }
        dispatcher.join().await;

        lighting.switch_off();
        tracing::info!(mode = %state.force_reset(), "dock stopped");

        api_result.map_err(|e| Error::Config(format!("API server task failed: {e}")))?
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("cameras", &self.config.cameras.count)
            .field("port", &self.config.server.port)
            .finish_non_exhaustive()
    }
}

fn build_sound(config: &Config) -> Arc<dyn SoundPlayer> {
    if !config.sound.enabled {
        return Arc::new(NoopSound);
    }

    match CpalSound::new(config.sound.files.clone()) {
        Ok(sound) => Arc::new(sound),
        Err(e) => {
            tracing::warn!(error = %e, "audio output unavailable, continuing silently");
            Arc::new(NoopSound)
        }
    }
}

fn build_notifier(config: &Config) -> Result<Arc<dyn Notifier>> {
    Ok(match &config.notify.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone(), config.notify.timeout)?),
        None => {
            tracing::info!("no completion webhook configured, completions are logged only");
            Arc::new(LogNotifier)
        }
    })
}

fn build_detector(config: &Config) -> Result<Arc<dyn Detector>> {
    Ok(match &config.detection.url {
        Some(url) => Arc::new(HttpDetector::new(
            url.clone(),
            config.detection.timeout,
            config.cameras.jpeg_quality,
        )?),
        None => {
            tracing::info!(
                "no detection endpoint configured, uploads rely on the forced-send gate"
            );
            Arc::new(NullDetector)
        }
    })
}

/// Construct the camera backend for `id`
///
/// # Errors
///
/// Returns error if the capture command template is invalid
pub fn build_camera(config: &Config, id: CameraId) -> Result<Box<dyn Camera>> {
    Ok(match config.cameras.backend {
        CameraBackend::Command => Box::new(CommandCamera::new(id, &config.cameras.command)?),
        CameraBackend::Synthetic => Box::new(SyntheticCamera::new(id)),
    })
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
