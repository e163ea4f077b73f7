//! TOML configuration file loading
//!
//! Supports `~/.config/omni/dock/config.toml` as a persistent config source.
//! Every field is optional; the file is a partial overlay on top of defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DockConfigFile {
    #[serde(default)]
    pub session: SessionFileConfig,

    #[serde(default)]
    pub cameras: CamerasFileConfig,

    #[serde(default)]
    pub detection: DetectionFileConfig,

    #[serde(default)]
    pub upload: UploadFileConfig,

    #[serde(default)]
    pub notify: NotifyFileConfig,

    #[serde(default)]
    pub lighting: LightingFileConfig,

    #[serde(default)]
    pub presence: PresenceFileConfig,

    #[serde(default)]
    pub sound: SoundFileConfig,

    #[serde(default)]
    pub reader: ReaderFileConfig,

    #[serde(default)]
    pub server: ServerFileConfig,
}

/// Session policy
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Credential that authorizes a return (hex EPC)
    pub target_credential: Option<String>,

    /// Minimum detection confidence that triggers an upload
    pub threshold: Option<f32>,

    /// Seconds after capture start when uploads are forced
    pub forced_send_secs: Option<f64>,

    /// "always" or "no_detections"
    pub forced_send_policy: Option<String>,

    /// Seconds after capture start when the session is abandoned
    pub watchdog_secs: Option<f64>,

    /// Upload attempts allowed per camera per session
    pub max_attempts: Option<u32>,

    /// Minimum milliseconds between one camera's upload attempts
    pub retry_gap_ms: Option<u64>,
}

/// Camera setup
#[derive(Debug, Default, Deserialize)]
pub struct CamerasFileConfig {
    pub count: Option<usize>,

    /// "command" or "synthetic"
    pub backend: Option<String>,

    /// Still-capture command; `{index}` is replaced with the camera index
    pub command: Option<String>,

    pub frame_interval_ms: Option<u64>,

    /// Power-on delay per camera index
    pub startup_stagger_ms: Option<u64>,

    pub jpeg_quality: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DetectionFileConfig {
    /// Inference endpoint; detection is disabled when unset
    pub url: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UploadFileConfig {
    pub url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub accept_invalid_certs: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotifyFileConfig {
    /// Completion webhook; completions are only logged when unset
    pub webhook_url: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LightingFileConfig {
    pub relay_pin: Option<u32>,
    pub active_high: Option<bool>,
    /// Deadline extension per captured frame
    pub frame_extension_ms: Option<u64>,
    pub poll_ms: Option<u64>,
    pub gpio_root: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PresenceFileConfig {
    pub enabled: Option<bool>,
    pub sensor_pin: Option<u32>,
    pub active_high: Option<bool>,
    pub extension_secs: Option<u64>,
    pub poll_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SoundFileConfig {
    pub enabled: Option<bool>,

    /// WAV overrides keyed by pattern name (prompt, authorized, complete, aborted)
    #[serde(default)]
    pub files: HashMap<String, PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReaderFileConfig {
    pub enabled: Option<bool>,
    pub device: Option<PathBuf>,
    pub baud: Option<u32>,
    pub poll_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub port: Option<u16>,
    pub bind: Option<String>,
}

/// Load the TOML config file
///
/// A missing file yields defaults. Unlike a missing file, a file that
/// exists but cannot be read or parsed is an error: a kiosk must not start
/// with silently-default credentials.
///
/// # Errors
///
/// Returns error if the file exists but cannot be read or parsed
pub fn load_config_file(path: Option<&Path>) -> Result<DockConfigFile> {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_file_path) else {
        return Ok(DockConfigFile::default());
    };

    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(DockConfigFile::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let config = parse(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error on invalid TOML or unknown sections
pub fn parse(content: &str) -> Result<DockConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/omni/dock/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.config_dir().join("omni").join("dock").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_parses() {
        let fc = parse(
            r#"
            [session]
            target_credential = "E2000017570D0173277006CB"
            forced_send_secs = 6.5

            [cameras]
            count = 1

            [sound.files]
            complete = "/opt/dock/complete.wav"
            "#,
        )
        .unwrap();

        assert_eq!(fc.session.forced_send_secs, Some(6.5));
        assert_eq!(fc.cameras.count, Some(1));
        assert!(fc.upload.url.is_none());
        assert_eq!(fc.sound.files.len(), 1);
    }

    #[test]
    fn unknown_section_rejected() {
        assert!(parse("[camera]\ncount = 2\n").is_err());
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let fc = tokio_test::assert_ok!(load_config_file(Some(&dir.path().join("absent.toml"))));
        assert!(fc.session.target_credential.is_none());
    }

    #[test]
    fn unreadable_toml_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[session\nthreshold = ").unwrap();
        tokio_test::assert_err!(load_config_file(Some(&path)));
    }
}
