use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use scooter_dock::actuators::{CpalSound, OutputPin, Pattern, SoundPlayer, SysfsPin};
use scooter_dock::credential::yrm100;
use scooter_dock::session::CameraId;
use scooter_dock::upload::encode_jpeg;
use scooter_dock::{Config, Daemon, daemon, lifecycle};

/// Dock - scooter return kiosk
#[derive(Parser)]
#[command(name = "dock", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/omni/dock/config.toml)
    #[arg(short, long, env = "DOCK_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Switch the lighting relay on, then off
    TestRelay {
        /// Seconds to keep the relay on
        #[arg(short, long, default_value = "3")]
        duration: u64,
    },
    /// Play every feedback pattern
    TestSound,
    /// Capture one frame and save it as JPEG
    TestCamera {
        /// Camera index
        #[arg(short, long, default_value = "0")]
        index: usize,
        /// Output file
        #[arg(short, long, default_value = "dock-test.jpg")]
        output: PathBuf,
    },
    /// Poll the tag reader and print the tags seen
    TestReader {
        /// Seconds to poll
        #[arg(short, long, default_value = "10")]
        duration: u64,
    },
    /// Query or change tag reader settings
    Reader {
        #[command(subcommand)]
        action: ReaderAction,
    },
    /// Install dock as a systemd user service
    Install,
    /// Uninstall the dock service
    Uninstall,
    /// Show service status
    Status,
    /// Show the service journal
    Logs {
        /// Number of lines to show
        #[arg(short, long, default_value = "50")]
        lines: usize,
        /// Follow log output
        #[arg(short, long)]
        follow: bool,
    },
}

#[derive(Subcommand)]
enum ReaderAction {
    /// Show TX power, or set it with --set
    Power {
        /// New TX power in dBm
        #[arg(long)]
        set: Option<f32>,
    },
    /// Show the frequency region, or set it with --set
    Region {
        /// china1, china2, europe, usa or korea
        #[arg(long)]
        set: Option<String>,
    },
    /// Soft-reset the reader and check that it answers
    Reset,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,scooter_dock=info",
        1 => "info,scooter_dock=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref();

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestRelay { duration } => test_relay(config_path, duration).await,
            Command::TestSound => test_sound(config_path).await,
            Command::TestCamera { index, output } => test_camera(config_path, index, &output).await,
            Command::TestReader { duration } => test_reader(config_path, duration).await,
            Command::Reader { action } => reader_settings(config_path, action).await,
            Command::Install => cmd_install(config_path),
            Command::Uninstall => cmd_uninstall(),
            Command::Status => cmd_status(),
            Command::Logs { lines, follow } => cmd_logs(lines, follow),
        };
    }

    let config = Config::load(config_path)?;
    tracing::debug!(?config, "loaded configuration");

    tracing::info!(
        cameras = config.cameras.count,
        upload = %config.upload.url,
        "starting dock"
    );

    Daemon::new(config)?.run().await?;
    Ok(())
}

/// Load config for a hardware test; the upload URL is not needed there
fn load_for_test(path: Option<&Path>) -> anyhow::Result<Config> {
    let fc = scooter_dock::config::file::load_config_file(path)?;
    Ok(Config::resolve(fc, |key| {
        std::env::var(format!("{}{key}", scooter_dock::config::ENV_PREFIX)).ok()
    })?)
}

/// Switch the relay on for `duration` seconds
async fn test_relay(path: Option<&Path>, duration: u64) -> anyhow::Result<()> {
    let config = load_for_test(path)?;
    let lighting = &config.lighting;
    let relay = SysfsPin::output(&lighting.gpio_root, lighting.relay_pin, lighting.active_high)?;

    println!("Relay on (GPIO {}) for {duration}s...", lighting.relay_pin);
    relay.set(true)?;
    tokio::time::sleep(Duration::from_secs(duration)).await;
    relay.set(false)?;
    println!("Relay off");

    Ok(())
}

/// Play each pattern in turn
async fn test_sound(path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_for_test(path)?;
    let sound = CpalSound::new(config.sound.files)?;

    for pattern in Pattern::ALL {
        println!("Playing {pattern:?}...");
        sound.play(pattern).await?;
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    println!("\n---");
    println!("If you heard four patterns, sound output is working!");
    Ok(())
}

/// Power a camera on, capture one frame and write it to `output`
async fn test_camera(path: Option<&Path>, index: usize, output: &Path) -> anyhow::Result<()> {
    let config = load_for_test(path)?;
    let mut camera = daemon::build_camera(&config, CameraId::new(index))?;

    println!("Capturing from camera {index}...");
    camera.power_on().await?;
    let frame = camera.capture().await;
    camera.power_off().await?;
    let frame = frame?;

    let jpeg = encode_jpeg(&frame.image, config.cameras.jpeg_quality)?;
    tokio::fs::write(output, &jpeg).await?;

    println!(
        "Saved {}x{} frame ({} bytes) to {}",
        frame.image.width(),
        frame.image.height(),
        jpeg.len(),
        output.display()
    );
    Ok(())
}

/// Print tags seen by the reader
async fn test_reader(path: Option<&Path>, duration: u64) -> anyhow::Result<()> {
    let config = load_for_test(path)?;
    let settings = yrm100::ReaderSettings::from(&config.reader);

    println!(
        "Polling {} for {duration}s, hold a tag near the reader...",
        settings.device.display()
    );
    let tags = yrm100::scan(&settings, Duration::from_secs(duration)).await?;

    if tags.is_empty() {
        println!("No tags seen");
    }
    for tag in &tags {
        let marker = if tag.credential() == config.session.target_credential {
            " (target)"
        } else {
            ""
        };
        println!("{} rssi={}{marker}", tag.credential(), tag.rssi);
    }
    Ok(())
}

/// Query or change TX power and region, or reset the reader
async fn reader_settings(path: Option<&Path>, action: ReaderAction) -> anyhow::Result<()> {
    let config = load_for_test(path)?;
    let settings = yrm100::ReaderSettings::from(&config.reader);
    let mut link = yrm100::ReaderLink::open(&settings).await?;

    match action {
        ReaderAction::Power { set: Some(dbm) } => {
            link.set_tx_power(dbm).await?;
            println!("TX power set to {:.2} dBm", link.tx_power().await?);
        }
        ReaderAction::Power { set: None } => {
            println!("TX power: {:.2} dBm", link.tx_power().await?);
        }
        ReaderAction::Region { set: Some(name) } => {
            let region: yrm100::Region = name.parse()?;
            link.set_region(region).await?;
            println!("Region set to {}", link.region().await?);
        }
        ReaderAction::Region { set: None } => {
            println!("Region: {}", link.region().await?);
        }
        ReaderAction::Reset => {
            println!("Resetting reader...");
            link.reset().await?;
            let power = link.tx_power().await?;
            println!("Reader is back (TX power {power:.2} dBm)");
        }
    }

    Ok(())
}

/// Install dock as a systemd user service
fn cmd_install(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = lifecycle::ServiceConfig {
        binary_path: std::env::current_exe()?,
        config_path: config_path.map(Path::to_path_buf),
        extra_args: Vec::new(),
    };

    lifecycle::install_service(&config)?;
    println!("Dock installed as systemd user service");
    Ok(())
}

/// Uninstall the dock service
fn cmd_uninstall() -> anyhow::Result<()> {
    lifecycle::uninstall_service()?;
    println!("Dock service removed");
    Ok(())
}

/// Show service status
fn cmd_status() -> anyhow::Result<()> {
    let status = lifecycle::service_status()?;
    println!("Dock service: {status}");
    Ok(())
}

/// Show the service journal
fn cmd_logs(lines: usize, follow: bool) -> anyhow::Result<()> {
    let status = std::process::Command::new("journalctl")
        .args(lifecycle::journal_args(lines, follow))
        .status()?;

    if !status.success() {
        anyhow::bail!("journalctl exited with {status}");
    }

    Ok(())
}
