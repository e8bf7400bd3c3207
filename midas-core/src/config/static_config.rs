//! Static configuration loaded once at startup
//!
//! This configuration is read-only after the daemon starts. Every section and
//! field is optional in the file; missing values fall back to the defaults of
//! the Midas 2×16 LCD.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::device::{DefaultDevice, LcdDevice};
use crate::{DeviceIdentity, MidasError, Result};

/// Longest reconnect delay accepted from the configuration (one day)
pub const MAX_RECONNECT_DELAY_SECS: u64 = 86_400;

/// Display device settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// USB vendor ID as a hex string
    pub vendor_id: String,
    /// USB product ID as a hex string
    pub product_id: String,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Pause after every command sent to the controller, in milliseconds
    pub settle_delay_ms: u64,
    /// Log every frame written to the serial port
    pub debug_uart: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        let identity = DefaultDevice::identity();
        Self {
            vendor_id: identity.vendor_id().to_string(),
            product_id: identity.product_id().to_string(),
            baud_rate: DefaultDevice::BAUD_RATE,
            settle_delay_ms: DefaultDevice::SETTLE_DELAY_MS,
            debug_uart: false,
        }
    }
}

impl DeviceSettings {
    /// Parse the configured identifiers into a [`DeviceIdentity`]
    pub fn identity(&self) -> Result<DeviceIdentity> {
        DeviceIdentity::new(&self.vendor_id, &self.product_id)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Polling loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Pause between display refreshes, in milliseconds
    pub interval_ms: u64,
    /// Sensor label shown on the first line
    pub cpu_sensor: String,
    /// Sensor label shown on the second line
    pub gpu_sensor: String,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            cpu_sensor: "CPU Package".to_string(),
            gpu_sensor: "GPU Core".to_string(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Reconnection policy after a device or sensor failure
///
/// The defaults retry forever with a fixed 2 second pause. Set
/// `backoff_multiplier` above 1.0 for exponential backoff capped at
/// `max_delay_secs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Whether failures in the polling loop are retried at all
    pub enabled: bool,
    /// Maximum consecutive attempts (0 = unlimited)
    pub max_attempts: u32,
    /// Delay before the first attempt, in seconds
    pub initial_delay_secs: u64,
    /// Upper bound for the delay, in seconds
    pub max_delay_secs: u64,
    /// Factor applied to the delay after each failed attempt
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 0,
            initial_delay_secs: 2,
            max_delay_secs: 30,
            backoff_multiplier: 1.0,
        }
    }
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    /// Delay to use after `delay`, capped at `max_delay_secs`
    pub fn next_delay(&self, delay: Duration) -> Duration {
        let max_delay = Duration::from_secs(self.max_delay_secs.max(self.initial_delay_secs));
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.backoff_multiplier)
            .map_or(max_delay, |next| next.min(max_delay))
    }
}

/// A file-backed temperature input
///
/// The file holds a single number, e.g. a Linux hwmon `temp*_input` file
/// in millidegrees (use `scale = 0.001`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorInput {
    /// Label the supervisor asks for (e.g. "CPU Package")
    pub label: String,
    /// File to read the raw value from
    pub path: PathBuf,
    /// Factor converting the raw value to degrees Celsius
    #[serde(default = "default_scale")]
    pub scale: f32,
}

fn default_scale() -> f32 {
    0.001
}

/// Static configuration for the Midas LCD daemon.
///
/// Located at `~/.config/midas-lcd/config.toml` by default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticConfig {
    /// Display device settings
    pub device: DeviceSettings,

    /// Polling loop settings
    pub polling: PollingConfig,

    /// Reconnection policy
    pub reconnect: ReconnectConfig,

    /// File-backed sensor inputs
    pub sensors: Vec<SensorInput>,
}

impl StaticConfig {
    /// Parse StaticConfig from TOML string.
    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize StaticConfig to TOML string.
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Load and validate the configuration file
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            MidasError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config = Self::from_toml(&content).map_err(|e| {
            MidasError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Check values that would make the polling loop misbehave
    pub fn validate(&self) -> Result<()> {
        self.device
            .identity()
            .map_err(|e| MidasError::Config(e.to_string()))?;

        if self.device.baud_rate == 0 {
            return Err(MidasError::Config(
                "device.baud_rate must be greater than 0".to_string(),
            ));
        }

        if self.polling.interval_ms == 0 {
            return Err(MidasError::Config(
                "polling.interval_ms must be greater than 0".to_string(),
            ));
        }

        let multiplier = self.reconnect.backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(MidasError::Config(format!(
                "reconnect.backoff_multiplier must be >= 1.0, got {}",
                self.reconnect.backoff_multiplier
            )));
        }

        for (name, secs) in [
            ("initial_delay_secs", self.reconnect.initial_delay_secs),
            ("max_delay_secs", self.reconnect.max_delay_secs),
        ] {
            if secs > MAX_RECONNECT_DELAY_SECS {
                return Err(MidasError::Config(format!(
                    "reconnect.{} must be at most {}, got {}",
                    name, MAX_RECONNECT_DELAY_SECS, secs
                )));
            }
        }

        if let Some(input) = self.sensors.iter().find(|s| s.label.trim().is_empty()) {
            return Err(MidasError::Config(format!(
                "sensor input {} has an empty label",
                input.path.display()
            )));
        }

        Ok(())
    }
}
