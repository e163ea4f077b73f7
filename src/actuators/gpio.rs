//! GPIO pins via the Linux sysfs interface
//!
//! Pins are exported on construction. A kiosk without GPIO access falls back
//! to [`NoopPin`] so session logic keeps running.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{Error, Result};

/// Default sysfs GPIO root
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Digital output (relay coil, indicator)
pub trait OutputPin: Send + Sync {
    /// Drive the pin to its active (`true`) or inactive level
    ///
    /// # Errors
    ///
    /// Returns error if the pin cannot be written
    fn set(&self, active: bool) -> Result<()>;
}

/// Digital input (presence sensor)
pub trait InputPin: Send + Sync {
    /// Read whether the pin is at its active level
    ///
    /// # Errors
    ///
    /// Returns error if the pin cannot be read
    fn read(&self) -> Result<bool>;
}

/// Pin direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    In,
    Out,
}

impl Direction {
    const fn as_str(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

/// A sysfs-exported GPIO line
#[derive(Debug)]
pub struct SysfsPin {
    number: u32,
    active_high: bool,
    value_path: PathBuf,
}

impl SysfsPin {
    /// Export `number` as an output and drive it inactive
    ///
    /// # Errors
    ///
    /// Returns error if the pin cannot be exported or configured
    pub fn output(root: &Path, number: u32, active_high: bool) -> Result<Self> {
        let pin = Self::export(root, number, active_high, Direction::Out)?;
        pin.set(false)?;
        Ok(pin)
    }

    /// Export `number` as an input
    ///
    /// # Errors
    ///
    /// Returns error if the pin cannot be exported or configured
    pub fn input(root: &Path, number: u32, active_high: bool) -> Result<Self> {
        Self::export(root, number, active_high, Direction::In)
    }

    fn export(root: &Path, number: u32, active_high: bool, direction: Direction) -> Result<Self> {
        let pin_dir = root.join(format!("gpio{number}"));

        if !pin_dir.exists() {
            fs::write(root.join("export"), number.to_string())
                .map_err(|e| Error::Actuator(format!("failed to export gpio{number}: {e}")))?;
        }

        fs::write(pin_dir.join("direction"), direction.as_str()).map_err(|e| {
            Error::Actuator(format!("failed to set gpio{number} direction: {e}"))
        })?;

        tracing::debug!(pin = number, direction = direction.as_str(), active_high, "gpio exported");

        Ok(Self {
            number,
            active_high,
            value_path: pin_dir.join("value"),
        })
    }
}

impl OutputPin for SysfsPin {
    fn set(&self, active: bool) -> Result<()> {
        let level = if active == self.active_high { "1" } else { "0" };
        fs::write(&self.value_path, level)
            .map_err(|e| Error::Actuator(format!("failed to write gpio{}: {e}", self.number)))
    }
}

impl InputPin for SysfsPin {
    fn read(&self) -> Result<bool> {
        let raw = fs::read_to_string(&self.value_path)
            .map_err(|e| Error::Actuator(format!("failed to read gpio{}: {e}", self.number)))?;
        let high = raw.trim() == "1";
        Ok(high == self.active_high)
    }
}

/// Pin that does nothing (hardware absent)
#[derive(Debug, Default)]
pub struct NoopPin;

impl OutputPin for NoopPin {
    fn set(&self, _active: bool) -> Result<()> {
        Ok(())
    }
}

impl InputPin for NoopPin {
    fn read(&self) -> Result<bool> {
        Ok(false)
    }
}

/// In-memory pin for tests and simulation
#[derive(Debug, Clone, Default)]
pub struct MemoryPin {
    level: Arc<AtomicBool>,
}

impl MemoryPin {
    /// Create an inactive pin
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current level
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }

    /// Force the level (simulated input)
    pub fn force(&self, active: bool) {
        self.level.store(active, Ordering::SeqCst);
    }
}

impl OutputPin for MemoryPin {
    fn set(&self, active: bool) -> Result<()> {
        self.force(active);
        Ok(())
    }
}

impl InputPin for MemoryPin {
    fn read(&self) -> Result<bool> {
        Ok(self.is_active())
    }
}

/// Open an output pin, degrading to [`NoopPin`] on failure
#[must_use]
pub fn output_or_noop(root: &Path, number: u32, active_high: bool) -> Arc<dyn OutputPin> {
    match SysfsPin::output(root, number, active_high) {
        Ok(pin) => Arc::new(pin),
        Err(e) => {
            tracing::warn!(
                pin = number,
                error = %e,
                "output pin unavailable, continuing without it"
            );
            Arc::new(NoopPin)
        }
    }
}

/// Open an input pin, returning `None` on failure
#[must_use]
pub fn input_or_none(root: &Path, number: u32, active_high: bool) -> Option<Arc<dyn InputPin>> {
    match SysfsPin::input(root, number, active_high) {
        Ok(pin) => Some(Arc::new(pin)),
        Err(e) => {
            tracing::warn!(
                pin = number,
                error = %e,
                "input pin unavailable, continuing without it"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_sysfs(number: u32) -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join(format!("gpio{number}"))).unwrap();
        root
    }

    #[test]
    fn output_pin_writes_levels() {
        let root = fake_sysfs(27);
        let pin = SysfsPin::output(root.path(), 27, true).unwrap();
        let value = root.path().join("gpio27/value");

        assert_eq!(fs::read_to_string(&value).unwrap(), "0");
        pin.set(true).unwrap();
        assert_eq!(fs::read_to_string(&value).unwrap(), "1");
        assert_eq!(fs::read_to_string(root.path().join("gpio27/direction")).unwrap(), "out");
    }

    #[test]
    fn active_low_output_inverts() {
        let root = fake_sysfs(5);
        let pin = SysfsPin::output(root.path(), 5, false).unwrap();
        let value = root.path().join("gpio5/value");

        assert_eq!(fs::read_to_string(&value).unwrap(), "1");
        pin.set(true).unwrap();
        assert_eq!(fs::read_to_string(&value).unwrap(), "0");
    }

    #[test]
    fn input_pin_reads_value() {
        let root = fake_sysfs(17);
        let pin = SysfsPin::input(root.path(), 17, true).unwrap();

        fs::write(root.path().join("gpio17/value"), "1\n").unwrap();
        assert!(pin.read().unwrap());
        fs::write(root.path().join("gpio17/value"), "0\n").unwrap();
        assert!(!pin.read().unwrap());
    }

    #[test]
    fn missing_sysfs_degrades() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("nope");
        assert!(SysfsPin::output(&missing, 27, true).is_err());
        assert!(output_or_noop(&missing, 27, true).set(true).is_ok());
        assert!(input_or_none(&missing, 17, true).is_none());
    }
}
