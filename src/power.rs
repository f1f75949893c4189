//! Power supply health of the gateway board.
//!
//! The HAT reports the state of its primary and secondary supplies on two
//! digital inputs. A low input means the supply has failed.

use crate::error::TransportError;
use log::{debug, info, warn};
use std::fmt;
use std::path::{Path, PathBuf};

/// BCM number of the primary supply input on the HAT
pub const PRIMARY_PWR_PIN: u32 = 6;
/// BCM number of the secondary supply input on the HAT
pub const SECONDARY_PWR_PIN: u32 = 5;

pub trait PowerInputs {
    fn primary_ok(&mut self) -> Result<bool, TransportError>;
    fn secondary_ok(&mut self) -> Result<bool, TransportError>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PowerStatus {
    /// Gateway opened successfully
    InitOk,
    /// The inputs could not be read
    InitFailed,
    PrimaryFailure,
    SecondaryFailure,
    PwrOk,
}

impl PowerStatus {
    /// Numeric status code, as reported by the board tools
    pub fn code(&self) -> u8 {
        match self {
            PowerStatus::InitOk => 0x00,
            PowerStatus::InitFailed => 0x01,
            PowerStatus::PrimaryFailure => 0x02,
            PowerStatus::SecondaryFailure => 0x03,
            PowerStatus::PwrOk => 0x04,
        }
    }
}

impl fmt::Display for PowerStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            PowerStatus::InitOk => "Initialisation OK",
            PowerStatus::InitFailed => "Initialisation failed",
            PowerStatus::PrimaryFailure => "Primary power failure",
            PowerStatus::SecondaryFailure => "Secondary power failure",
            PowerStatus::PwrOk => "Power sources OK",
        };
        write!(f, "{}", s)
    }
}

/// Check both supplies. The primary is checked first.
pub fn check_power_status(inputs: &mut dyn PowerInputs) -> PowerStatus {
    let status = match inputs.primary_ok() {
        Err(e) => {
            warn!("Failed to read primary power input: {}", e);
            PowerStatus::InitFailed
        }
        Ok(false) => PowerStatus::PrimaryFailure,
        Ok(true) => match inputs.secondary_ok() {
            Err(e) => {
                warn!("Failed to read secondary power input: {}", e);
                PowerStatus::InitFailed
            }
            Ok(false) => PowerStatus::SecondaryFailure,
            Ok(true) => PowerStatus::PwrOk,
        },
    };
    match status {
        PowerStatus::PwrOk => info!("{}", status),
        _ => warn!("{}", status),
    }
    status
}

/// Fixed input levels. Used when the board has no readable inputs.
#[derive(Debug, Copy, Clone)]
pub struct StaticInputs {
    pub primary: bool,
    pub secondary: bool,
}

impl PowerInputs for StaticInputs {
    fn primary_ok(&mut self) -> Result<bool, TransportError> {
        Ok(self.primary)
    }

    fn secondary_ok(&mut self) -> Result<bool, TransportError> {
        Ok(self.secondary)
    }
}

/// Inputs read through the Linux sysfs GPIO interface
#[derive(Debug, Clone)]
pub struct SysfsInputs {
    base_path: PathBuf,
    primary: u32,
    secondary: u32,
}

impl Default for SysfsInputs {
    fn default() -> Self {
        Self::new("/sys/class/gpio")
    }
}

impl SysfsInputs {
    pub fn new(base_path: impl Into<PathBuf>) -> SysfsInputs {
        SysfsInputs {
            base_path: base_path.into(),
            primary: PRIMARY_PWR_PIN,
            secondary: SECONDARY_PWR_PIN,
        }
    }

    /// Export both pins and make them inputs. Failures are only logged,
    /// the pins may already be set up.
    pub fn setup(&self) {
        for gpio in [self.primary, self.secondary] {
            let gpio_path = self.base_path.join(format!("gpio{}", gpio));
            if !gpio_path.exists() {
                if let Err(e) = std::fs::write(self.base_path.join("export"), gpio.to_string()) {
                    warn!("Failed to export GPIO {}: {}", gpio, e);
                }
            }
            if let Err(e) = std::fs::write(gpio_path.join("direction"), "in") {
                debug!("Failed to set GPIO {} as input: {}", gpio, e);
            }
        }
    }

    fn read(&self, gpio: u32) -> Result<bool, TransportError> {
        let path = self.base_path.join(format!("gpio{}", gpio)).join("value");
        read_value(&path)
    }
}

fn read_value(path: &Path) -> Result<bool, TransportError> {
    let content = std::fs::read_to_string(path)?;
    match content.trim() {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(TransportError::Other(format!(
            "Unexpected GPIO value '{}' in {}",
            other,
            path.display()
        ))),
    }
}

impl PowerInputs for SysfsInputs {
    fn primary_ok(&mut self) -> Result<bool, TransportError> {
        self.read(self.primary)
    }

    fn secondary_ok(&mut self) -> Result<bool, TransportError> {
        self.read(self.secondary)
    }
}
