//! Configuration management for the dock daemon
//!
//! Values resolve `env > toml > default`. Environment variables carry the
//! `DOCK_` prefix (`DOCK_TARGET_CREDENTIAL`, `DOCK_UPLOAD_URL`, ...).

pub mod file;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::actuators::Pattern;
use crate::actuators::gpio::SYSFS_GPIO_ROOT;
use crate::capture::ForcedSendPolicy;
use crate::{Error, Result};

use self::file::DockConfigFile;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "DOCK_";

/// Tag accepted when none is configured
pub const DEFAULT_TARGET_CREDENTIAL: &str = "E2000017570D0173277006CB";

/// Default still-capture command
pub const DEFAULT_CAPTURE_COMMAND: &str =
    "rpicam-still --camera {index} -n -t 1 --width 640 --height 480 -e jpg -o -";

/// Dock daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub session: SessionConfig,
    pub cameras: CameraConfig,
    pub detection: DetectionConfig,
    pub upload: UploadConfig,
    pub notify: NotifyConfig,
    pub lighting: LightingConfig,
    pub presence: PresenceConfig,
    pub sound: SoundConfig,
    pub reader: ReaderConfig,
    pub server: ServerConfig,
}

/// Session policy
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Credential that authorizes a return
    pub target_credential: String,

    /// Confidence gate threshold (0..=1)
    pub threshold: f32,

    /// Elapsed capture time after which uploads are forced
    pub forced_send_after: Duration,

    /// When the forced-send gate applies
    pub forced_send_policy: ForcedSendPolicy,

    /// Hard bound on time spent capturing
    pub watchdog_bound: Duration,

    /// Watchdog poll period
    pub watchdog_poll: Duration,

    /// Upload attempts allowed per camera per session
    pub max_attempts: u32,

    /// Minimum spacing between one camera's upload attempts
    pub retry_gap: Duration,
}

/// Camera backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraBackend {
    /// External still-capture command
    Command,
    /// In-process generated frames
    Synthetic,
}

impl FromStr for CameraBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "command" => Ok(Self::Command),
            "synthetic" => Ok(Self::Synthetic),
            other => Err(Error::Config(format!("unknown camera backend: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub count: usize,
    pub backend: CameraBackend,
    pub command: String,
    pub frame_interval: Duration,
    /// Power-on delay multiplied by the camera index
    pub startup_stagger: Duration,
    pub jpeg_quality: u8,
}

impl CameraConfig {
    /// Power-on delay of the last camera
    #[must_use]
    pub fn worst_case_stagger(&self) -> Duration {
        let steps = u32::try_from(self.count.saturating_sub(1)).unwrap_or(u32::MAX);
        self.startup_stagger.saturating_mul(steps)
    }
}

#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Inference endpoint; `None` runs on the forced-send gate alone
    pub url: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub url: String,
    pub timeout: Duration,
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LightingConfig {
    pub relay_pin: u32,
    pub active_high: bool,
    pub frame_extension: Duration,
    pub poll: Duration,
    pub gpio_root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub enabled: bool,
    pub sensor_pin: u32,
    pub active_high: bool,
    pub extension: Duration,
    pub poll: Duration,
}

#[derive(Debug, Clone)]
pub struct SoundConfig {
    pub enabled: bool,
    pub files: HashMap<Pattern, PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub enabled: bool,
    pub device: PathBuf,
    pub baud: u32,
    pub poll: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Config {
    /// Load configuration from the environment and the TOML file
    ///
    /// `path` overrides the default file location.
    ///
    /// # Errors
    ///
    /// Returns error if the file is invalid or the resolved values fail
    /// validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path)?;
        let config = Self::resolve(fc, |key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve file values and environment lookups into a configuration
    ///
    /// `env` receives keys without the `DOCK_` prefix.
    ///
    /// # Errors
    ///
    /// Returns error if an environment value cannot be parsed
    pub fn resolve(fc: DockConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let parsed = |key: &str| -> Result<Option<f64>> { parse_env(&env, key) };
        let millis = |key: &str, file: Option<u64>, default: u64| -> Result<Duration> {
            Ok(Duration::from_millis(parse_env(&env, key)?.or(file).unwrap_or(default)))
        };

        // Session policy (env > toml > default)
        let forced_send_policy = match env("FORCED_SEND_POLICY").or(fc.session.forced_send_policy) {
            Some(s) => s.parse()?,
            None => ForcedSendPolicy::default(),
        };
        let session = SessionConfig {
            target_credential: env("TARGET_CREDENTIAL")
                .or(fc.session.target_credential)
                .unwrap_or_else(|| DEFAULT_TARGET_CREDENTIAL.to_string()),
            threshold: parse_env(&env, "THRESHOLD")?
                .or(fc.session.threshold)
                .unwrap_or(0.80),
            forced_send_after: secs(
                parsed("FORCED_SEND_SECS")?.or(fc.session.forced_send_secs),
                8.0,
            )?,
            forced_send_policy,
            watchdog_bound: secs(parsed("WATCHDOG_SECS")?.or(fc.session.watchdog_secs), 15.0)?,
            watchdog_poll: Duration::from_millis(250),
            max_attempts: parse_env(&env, "MAX_ATTEMPTS")?
                .or(fc.session.max_attempts)
                .unwrap_or(10),
            retry_gap: millis("RETRY_GAP_MS", fc.session.retry_gap_ms, 1500)?,
        };

        // Cameras
        let backend = match env("CAMERA_BACKEND").or(fc.cameras.backend) {
            Some(s) => s.parse()?,
            None => CameraBackend::Command,
        };
        let cameras = CameraConfig {
            count: parse_env(&env, "CAMERA_COUNT")?
                .or(fc.cameras.count)
                .unwrap_or(2),
            backend,
            command: env("CAPTURE_COMMAND")
                .or(fc.cameras.command)
                .unwrap_or_else(|| DEFAULT_CAPTURE_COMMAND.to_string()),
            frame_interval: millis("FRAME_INTERVAL_MS", fc.cameras.frame_interval_ms, 200)?,
            startup_stagger: millis("STARTUP_STAGGER_MS", fc.cameras.startup_stagger_ms, 1000)?,
            jpeg_quality: parse_env(&env, "JPEG_QUALITY")?
                .or(fc.cameras.jpeg_quality)
                .unwrap_or(85),
        };

        let detection = DetectionConfig {
            url: env("DETECTION_URL").or(fc.detection.url),
            timeout: millis("DETECTION_TIMEOUT_MS", fc.detection.timeout_ms, 500)?,
        };

        let upload = UploadConfig {
            url: env("UPLOAD_URL").or(fc.upload.url).unwrap_or_default(),
            timeout: millis("UPLOAD_TIMEOUT_MS", fc.upload.timeout_ms, 1000)?,
            accept_invalid_certs: parse_bool(&env, "UPLOAD_ACCEPT_INVALID_CERTS")
                .or(fc.upload.accept_invalid_certs)
                .unwrap_or(false),
        };

        let notify = NotifyConfig {
            webhook_url: env("NOTIFY_URL").or(fc.notify.webhook_url),
            timeout: millis("NOTIFY_TIMEOUT_MS", fc.notify.timeout_ms, 2000)?,
        };

        let lighting = LightingConfig {
            relay_pin: parse_env(&env, "RELAY_PIN")?
                .or(fc.lighting.relay_pin)
                .unwrap_or(27),
            active_high: fc.lighting.active_high.unwrap_or(true),
            frame_extension: millis("FRAME_EXTENSION_MS", fc.lighting.frame_extension_ms, 2000)?,
            poll: millis("LIGHTING_POLL_MS", fc.lighting.poll_ms, 100)?,
            gpio_root: env("GPIO_ROOT")
                .map(PathBuf::from)
                .or(fc.lighting.gpio_root)
                .unwrap_or_else(|| PathBuf::from(SYSFS_GPIO_ROOT)),
        };

        let presence = PresenceConfig {
            enabled: parse_bool(&env, "PRESENCE_ENABLED")
                .or(fc.presence.enabled)
                .unwrap_or(true),
            sensor_pin: parse_env(&env, "PRESENCE_PIN")?
                .or(fc.presence.sensor_pin)
                .unwrap_or(17),
            active_high: fc.presence.active_high.unwrap_or(true),
            extension: Duration::from_secs(fc.presence.extension_secs.unwrap_or(30)),
            poll: millis("PRESENCE_POLL_MS", fc.presence.poll_ms, 500)?,
        };

        let mut files = HashMap::new();
        for (name, path) in fc.sound.files {
            let pattern = Pattern::from_name(&name)
                .ok_or_else(|| Error::Config(format!("unknown sound pattern: {name}")))?;
            files.insert(pattern, path);
        }
        let sound = SoundConfig {
            enabled: parse_bool(&env, "SOUND_ENABLED")
                .or(fc.sound.enabled)
                .unwrap_or(true),
            files,
        };

        let reader = ReaderConfig {
            enabled: parse_bool(&env, "READER_ENABLED")
                .or(fc.reader.enabled)
                .unwrap_or(true),
            device: env("READER_DEVICE")
                .map(PathBuf::from)
                .or(fc.reader.device)
                .unwrap_or_else(|| PathBuf::from("/dev/ttyAMA0")),
            baud: parse_env(&env, "READER_BAUD")?
                .or(fc.reader.baud)
                .unwrap_or(115_200),
            poll: millis("READER_POLL_MS", fc.reader.poll_ms, 100)?,
        };

        let server = ServerConfig {
            bind: env("BIND").or(fc.server.bind).unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_env(&env, "PORT")?.or(fc.server.port).unwrap_or(5000),
        };

        Ok(Self {
            session,
            cameras,
            detection,
            upload,
            notify,
            lighting,
            presence,
            sound,
            reader,
            server,
        })
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first violated constraint
    pub fn validate(&self) -> Result<()> {
        if self.cameras.count == 0 {
            return Err(Error::Config("cameras.count must be at least 1".to_string()));
        }

        if !(0.0..=1.0).contains(&self.session.threshold) {
            return Err(Error::Config(format!(
                "session.threshold must be within 0..=1, got {}",
                self.session.threshold
            )));
        }

        if self.session.max_attempts == 0 {
            return Err(Error::Config("session.max_attempts must be at least 1".to_string()));
        }

        // Paced retries must be able to reach the end of the capture window
        let retry_span = self.session.retry_gap.saturating_mul(self.session.max_attempts);
        if retry_span < self.session.watchdog_bound {
            return Err(Error::Config(format!(
                "session.max_attempts x retry gap ({retry_span:?}) must cover the watchdog ({:?})",
                self.session.watchdog_bound
            )));
        }

        if self.upload.url.trim().is_empty() {
            return Err(Error::Config(
                "upload.url is not set (DOCK_UPLOAD_URL or [upload] url)".to_string(),
            ));
        }

        // The session must be able to finish a forced upload from the last
        // camera before it is abandoned
        let needed = self.session.forced_send_after
            + self.cameras.worst_case_stagger()
            + self.upload.timeout;
        if self.session.watchdog_bound <= needed {
            return Err(Error::Config(format!(
                "session watchdog ({:?}) must exceed forced-send bound + camera stagger \
                 + upload timeout ({needed:?})",
                self.session.watchdog_bound
            )));
        }

        if self.cameras.jpeg_quality == 0 || self.cameras.jpeg_quality > 100 {
            return Err(Error::Config("cameras.jpeg_quality must be within 1..=100".to_string()));
        }

        Ok(())
    }
}

fn parse_env<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    env(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid value for {ENV_PREFIX}{key}: {raw}")))
        })
        .transpose()
}

fn parse_bool(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    env(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

fn secs(value: Option<f64>, default: f64) -> Result<Duration> {
    let value = value.unwrap_or(default);
    Duration::try_from_secs_f64(value)
        .map_err(|_| Error::Config(format!("invalid duration in seconds: {value}")))
}
