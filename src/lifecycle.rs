//! Service lifecycle management
//!
//! Install, uninstall, and query the dock as a systemd user service. The
//! kiosk hardware is Linux-only; other platforms report unsupported.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// systemd unit name
pub const SERVICE_NAME: &str = "dock";

/// Service status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Service is running
    Running,
    /// Service is installed but not running
    Stopped,
    /// Service is not installed
    NotInstalled,
    /// Status could not be determined
    Unknown(String),
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::NotInstalled => write!(f, "not installed"),
            Self::Unknown(msg) => write!(f, "unknown ({msg})"),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Path to the dock binary
    pub binary_path: PathBuf,
    /// Config file passed with `--config`
    pub config_path: Option<PathBuf>,
    /// Extra arguments
    pub extra_args: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("dock"),
            config_path: None,
            extra_args: Vec::new(),
        }
    }
}

/// Render the systemd unit for `config`
#[must_use]
pub fn render_unit(config: &ServiceConfig) -> String {
    let mut exec = quote(&config.binary_path);
    if let Some(path) = &config.config_path {
        exec.push_str(" --config ");
        exec.push_str(&quote(path));
    }
    for arg in &config.extra_args {
        exec.push(' ');
        exec.push_str(arg);
    }

    format!(
        r"[Unit]
Description=Scooter return dock
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
ExecStart={exec}
Restart=on-failure
RestartSec=5
KillSignal=SIGTERM
TimeoutStopSec=10
Environment=RUST_LOG=info

[Install]
WantedBy=default.target
"
    )
}

fn quote(path: &Path) -> String {
    let s = path.display().to_string();
    if s.contains(' ') { format!("\"{s}\"") } else { s }
}

/// Path of the installed unit file
#[must_use]
pub fn service_file_path() -> PathBuf {
    let config_dir = directories::BaseDirs::new()
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });

    config_dir
        .join("systemd/user")
        .join(format!("{SERVICE_NAME}.service"))
}

/// Arguments for `journalctl` to show the service log
#[must_use]
pub fn journal_args(lines: usize, follow: bool) -> Vec<String> {
    let mut args = vec![
        "--user".to_string(),
        "-u".to_string(),
        SERVICE_NAME.to_string(),
        format!("-n{lines}"),
        "--no-pager".to_string(),
    ];
    if follow {
        args.push("-f".to_string());
    }
    args
}

/// Install the dock as a systemd user service and start it
///
/// # Errors
///
/// Returns error if service installation fails
pub fn install_service(config: &ServiceConfig) -> Result<()> {
    if !cfg!(target_os = "linux") {
        return Err(Error::Config(
            "service installation not supported on this platform".to_string(),
        ));
    }

    let path = service_file_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, render_unit(config))?;

    run_systemctl(&["--user", "daemon-reload"])?;
    run_systemctl(&["--user", "enable", "--now", SERVICE_NAME])?;

    tracing::info!(path = %path.display(), "installed systemd user service");
    Ok(())
}

/// Stop and remove the service
///
/// # Errors
///
/// Returns error if the unit file cannot be removed
pub fn uninstall_service() -> Result<()> {
    let _ = run_systemctl(&["--user", "disable", "--now", SERVICE_NAME]);

    let path = service_file_path();
    if path.exists() {
        std::fs::remove_file(&path)?;
        let _ = run_systemctl(&["--user", "daemon-reload"]);
        tracing::info!("uninstalled systemd user service");
    }

    Ok(())
}

/// Query service status
///
/// # Errors
///
/// Returns error if `systemctl` cannot be run
pub fn service_status() -> Result<ServiceStatus> {
    if !service_file_path().exists() {
        return Ok(ServiceStatus::NotInstalled);
    }

    let output = std::process::Command::new("systemctl")
        .args(["--user", "is-active", SERVICE_NAME])
        .output()
        .map_err(|e| Error::Config(format!("failed to run systemctl: {e}")))?;

    Ok(parse_is_active(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_is_active(stdout: &str) -> ServiceStatus {
    match stdout.trim() {
        "active" | "activating" => ServiceStatus::Running,
        "inactive" | "failed" => ServiceStatus::Stopped,
        other => ServiceStatus::Unknown(other.to_string()),
    }
}

fn run_systemctl(args: &[&str]) -> Result<()> {
    let output = std::process::Command::new("systemctl")
        .args(args)
        .output()
        .map_err(|e| Error::Config(format!("failed to run systemctl: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Config(format!(
            "systemctl {} failed: {stderr}",
            args.join(" ")
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_status_display() {
        assert_eq!(ServiceStatus::Running.to_string(), "running");
        assert_eq!(ServiceStatus::NotInstalled.to_string(), "not installed");
        assert_eq!(ServiceStatus::Unknown("x".into()).to_string(), "unknown (x)");
    }

    #[test]
    fn unit_passes_config_path() {
        let unit = render_unit(&ServiceConfig {
            binary_path: PathBuf::from("/usr/local/bin/dock"),
            config_path: Some(PathBuf::from("/etc/dock/my config.toml")),
            extra_args: vec!["-v".to_string()],
        });

        assert!(unit.contains(
            "ExecStart=/usr/local/bin/dock --config \"/etc/dock/my config.toml\" -v\n"
        ));
        assert!(unit.contains("KillSignal=SIGTERM"));
    }

    #[test]
    fn is_active_output_parses() {
        assert_eq!(parse_is_active("active\n"), ServiceStatus::Running);
        assert_eq!(parse_is_active("failed\n"), ServiceStatus::Stopped);
        assert!(matches!(parse_is_active("reloading"), ServiceStatus::Unknown(_)));
    }

    #[test]
    fn journal_follow_flag() {
        let args = journal_args(20, true);
        assert!(args.contains(&"-n20".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("-f"));
    }

    #[test]
    fn service_path_names_unit() {
        assert!(service_file_path().to_string_lossy().ends_with("systemd/user/dock.service"));
    }
}
